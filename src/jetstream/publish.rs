//! Asynchronous publish pipeline and ack dispatch.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::connection::Message;
use crate::error::{timeout, Error, ErrorKind, Result};
use crate::headers::{
    NATS_EXPECTED_LAST_MSG_ID, NATS_EXPECTED_LAST_SEQUENCE, NATS_EXPECTED_LAST_SUBJECT_SEQUENCE, NATS_EXPECTED_STREAM, NATS_MSG_ID,
};
use crate::inbox;
use crate::jetstream::context::{Context, ContextInner};
use crate::jetstream::types::ApiResponse;

/// Per-message publish overrides, applied as request headers.
#[derive(Clone, Default)]
pub struct PublishOptions {
    pub msg_id: Option<String>,
    pub expect_last_msg_id: Option<String>,
    pub expect_stream: Option<String>,
    pub expect_last_seq: Option<u64>,
    pub expect_last_subject_seq: Option<u64>,
}

fn apply_publish_headers(msg: &mut Message, opts: &PublishOptions) {
    if let Some(id) = &opts.msg_id {
        msg.set_header(NATS_MSG_ID, id.clone());
    }
    if let Some(id) = &opts.expect_last_msg_id {
        msg.set_header(NATS_EXPECTED_LAST_MSG_ID, id.clone());
    }
    if let Some(stream) = &opts.expect_stream {
        msg.set_header(NATS_EXPECTED_STREAM, stream.clone());
    }
    if let Some(seq) = opts.expect_last_seq {
        msg.set_header(NATS_EXPECTED_LAST_SEQUENCE, seq.to_string());
    }
    if let Some(seq) = opts.expect_last_subject_seq {
        msg.set_header(NATS_EXPECTED_LAST_SUBJECT_SEQUENCE, seq.to_string());
    }
}

/// Carried to the user's [`crate::jetstream::options::ErrHandler`] when an
/// async-published message's ack indicates a problem.
/// Ownership of `msg` passes to the handler: it can resubmit it by simply
/// publishing it again, rather than the crate needing to track "did the
/// caller take it" itself.
pub struct PubAckError {
    pub kind: ErrorKind,
    pub err_code: u64,
    pub err_text: String,
    pub msg: Message,
}

impl Context {
    /// Publishes `data` to `subject`, blocking for a server ack (synchronous
    /// publish). Thin wrapper over the transport's request/reply, kept here
    /// because it shares header/option handling with the async path.
    pub fn publish(&self, subject: &str, data: impl Into<Vec<u8>>, opts: Option<PublishOptions>) -> Result<crate::jetstream::types::PubAck> {
        let mut msg = Message::new(subject, data.into());
        if let Some(opts) = &opts {
            apply_publish_headers(&mut msg, opts);
        }
        let wait = self.wait();
        let resp = self.connection().request(&msg.subject, msg.headers.clone(), &msg.data, wait)?;
        if resp.no_responders {
            return Err(Error::new(ErrorKind::NoResponders, format!("no responders for subject '{}'", subject)));
        }
        let envelope: ApiResponse = serde_json::from_slice(&resp.data)?;
        if let Some(err) = envelope.error {
            return Err(Error::with_code(ErrorKind::ServerError, err.description, err.err_code));
        }
        Ok(serde_json::from_slice(&resp.data)?)
    }

    /// Ensures the per-context reply prefix and dispatch subscription exist,
    /// creating them on the first call. Returns the stable reply prefix
    /// (`<inbox-prefix><8 base62>.`).
    fn ensure_reply_subscription(&self) -> Result<String> {
        let mut state = self.inner.state.lock();
        if let Some(prefix) = &state.reply_prefix {
            return Ok(prefix.clone());
        }

        let inbox = self.connection().new_inbox();
        let inbox_prefix = self.connection().inbox_prefix();
        let stable_suffix = if inbox.len() >= inbox::TOKEN_SIZE {
            &inbox[inbox.len() - inbox::TOKEN_SIZE..]
        } else {
            inbox.as_str()
        };
        let reply_prefix = format!("{}{}.", inbox_prefix, stable_suffix);

        let sub = self.connection().subscribe(&format!("{}*", reply_prefix))?;
        let weak: Weak<ContextInner> = Arc::downgrade(&self.inner);
        let prefix_len = reply_prefix.len();
        let sub = sub.with_handler(move |msg| {
            if let Some(inner) = weak.upgrade() {
                dispatch_ack(Context { inner }, msg, prefix_len);
            }
        });

        state.reply_prefix = Some(reply_prefix.clone());
        state.reply_sub = Some(sub);
        Ok(reply_prefix)
    }

    /// Publishes `msg` without blocking for a server ack; the ack is
    /// correlated later by [`Context::publish_async_complete`] or the
    /// configured error handler.
    pub fn publish_msg_async(&self, mut msg: Message, opts: Option<PublishOptions>) -> Result<()> {
        if let Some(opts) = &opts {
            apply_publish_headers(&mut msg, opts);
        }

        let reply_prefix = self.ensure_reply_subscription()?;
        let max_pending = self.inner.opts.publish_async.max_pending;
        let stall_wait = self.inner.opts.stall_wait();

        let token = {
            let mut state = self.inner.state.lock();
            state.pending += 1;

            if max_pending > 0 && state.pending > max_pending {
                state.stalled += 1;
                let deadline = Instant::now() + stall_wait;
                let mut timed_out = false;
                while state.pending > max_pending {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining == Duration::ZERO {
                        timed_out = true;
                        break;
                    }
                    let result = self.inner.cond.wait_for(&mut state, remaining);
                    if result.timed_out() && state.pending > max_pending {
                        timed_out = true;
                        break;
                    }
                }
                state.stalled -= 1;
                if timed_out {
                    state.pending -= 1;
                    return Err(timeout("stalled with too many outstanding async published messages"));
                }
            }

            inbox::new_token()
        };

        let reply = format!("{}{}", reply_prefix, token);
        {
            let mut state = self.inner.state.lock();
            if let Some(evicted) = state.insert(token.clone(), msg.clone()) {
                // Token collision: the evicted entry must not leak. Its reply
                // was already dropped at dispatch (the map no longer has its
                // token), so just drop it here.
                debug!("reply token '{}' collided; dropping evicted in-flight message", token);
                drop(evicted);
            }
        }

        let publish_result = self.connection().publish(msg.clone().with_reply(reply));
        if let Err(e) = publish_result {
            let mut state = self.inner.state.lock();
            if state.remove(&token).is_some() {
                state.pending -= 1;
                return Err(e);
            }
            // Already acked before the publish failure was observed: treat
            // as success, the library now owns the outcome either way.
        }

        Ok(())
    }

    /// Blocks until every outstanding async publish has been acked or
    /// errored. `None` blocks indefinitely; a zero-pending state observed at
    /// the deadline returns `Ok`, not `Timeout`.
    pub fn publish_async_complete(&self, wait: Option<Duration>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.inflight.is_empty() && state.pending == 0 {
            return Ok(());
        }

        state.pacw += 1;
        let mut timed_out = false;
        match wait {
            Some(w) => {
                let deadline = Instant::now() + w;
                while state.pending > 0 {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining == Duration::ZERO {
                        timed_out = true;
                        break;
                    }
                    let result = self.inner.cond.wait_for(&mut state, remaining);
                    if result.timed_out() && state.pending > 0 {
                        timed_out = true;
                        break;
                    }
                }
            }
            None => {
                while state.pending > 0 {
                    self.inner.cond.wait(&mut state);
                }
            }
        }
        state.pacw -= 1;

        if timed_out && state.pending == 0 {
            timed_out = false;
        }

        if timed_out {
            Err(timeout("timed out waiting for async publishes to complete"))
        } else {
            Ok(())
        }
    }

    /// Drains the inflight map, transferring ownership of the
    /// still-unacked messages to the caller.
    pub fn publish_async_get_pending_list(&self) -> Result<Vec<Message>> {
        let mut state = self.inner.state.lock();
        state.drain().ok_or_else(|| Error::new(ErrorKind::NotFound, "no pending async publishes"))
    }

    pub fn pending_async_publishes(&self) -> u64 {
        self.inner.state.lock().pending
    }
}

/// The reply-subscription dispatch callback. Runs on the subscription's
/// background thread, never under `ContextInner::state`'s lock while
/// invoking the user's error handler.
fn dispatch_ack(ctx: Context, msg: Message, prefix_len: usize) {
    if msg.subject.len() <= prefix_len {
        return;
    }
    let token = &msg.subject[prefix_len..];

    let pmsg = {
        let mut state = ctx.inner.state.lock();
        match state.remove(token) {
            Some(m) => m,
            None => return, // already handled, or a stray reply
        }
    };

    if let Some((kind, err_code, err_text)) = classify_reply(&msg) {
        if let Some(handler) = ctx.inner.opts.publish_async.err_handler.clone() {
            warn!("async publish ack error on '{}': {}", pmsg.subject, err_text);
            handler(
                &ctx,
                PubAckError {
                    kind,
                    err_code,
                    err_text,
                    msg: pmsg,
                },
            );
        }
    }

    let mut state = ctx.inner.state.lock();
    state.pending -= 1;
    let max_pending = ctx.inner.opts.publish_async.max_pending;
    if (state.pacw > 0 && state.pending == 0) || (state.stalled > 0 && (max_pending == 0 || state.pending <= max_pending)) {
        ctx.inner.cond.notify_all();
    }
}

/// Classifies an ack reply into `Some((kind, code, text))` on error, `None`
/// on success.
fn classify_reply(msg: &Message) -> Option<(ErrorKind, u64, String)> {
    if msg.no_responders {
        return Some((ErrorKind::NoResponders, 0, "no responders available for request".to_string()));
    }
    match serde_json::from_slice::<ApiResponse>(&msg.data) {
        Ok(envelope) => envelope.error.map(|e| (ErrorKind::ServerError, e.err_code, e.description)),
        Err(_) => None,
    }
}
