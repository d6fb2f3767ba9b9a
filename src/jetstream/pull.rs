//! Pull-mode batch fetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::connection::Message;
use crate::error::{not_found, timeout, Error, ErrorKind, Result};
use crate::headers::{DESCRIPTION, STATUS};
use crate::jetstream::ack::JsMessage;
use crate::jetstream::context::Context;
use crate::jetstream::subscription::JsSubscription;
use crate::jetstream::types::NextRequest;

const STATUS_NOT_FOUND: &str = "404";
const STATUS_REQUEST_TIMEOUT: &str = "408";
const STATUS_SERVICE_UNAVAILABLE: &str = "503";

enum Classified {
    UserMessage(Message),
    NotFound,
    RequestTimeout,
    Unavailable,
    Other(String),
}

/// Classifies a pull reply: a message with a body (or no headers at all)
/// is a user message; otherwise its `Status` header classifies it.
fn classify(msg: Message) -> Classified {
    if !msg.data.is_empty() || msg.headers.is_none() {
        return Classified::UserMessage(msg);
    }
    match msg.header(STATUS) {
        None => Classified::UserMessage(msg),
        Some(STATUS_NOT_FOUND) => Classified::NotFound,
        Some(STATUS_REQUEST_TIMEOUT) => Classified::RequestTimeout,
        Some(STATUS_SERVICE_UNAVAILABLE) => Classified::Unavailable,
        Some(_) => {
            let desc = msg.header(DESCRIPTION).unwrap_or("error checking pull subscribe message").to_string();
            Classified::Other(desc)
        }
    }
}

/// Fetches up to `batch` messages, waiting at most `timeout_dur` overall.
/// Drains already-buffered messages first, then issues a single batch
/// request for the rest, retrying a `no_wait` request once as a long-poll
/// if the stream was empty.
pub fn fetch(ctx: &Context, sub: &Arc<JsSubscription>, batch: usize, timeout_dur: Duration) -> Result<Vec<JsMessage>> {
    if batch == 0 {
        return Err(Error::new(ErrorKind::InvalidArgument, "batch must be greater than zero"));
    }
    if timeout_dur == Duration::ZERO {
        return Err(Error::new(ErrorKind::InvalidArgument, "timeout must be greater than zero"));
    }
    if !sub.is_pull() {
        return Err(Error::new(ErrorKind::InvalidSubscription, "not a pull subscription"));
    }
    let subj = sub.next_msg_subject().ok_or_else(|| Error::new(ErrorKind::IllegalState, "pull subscription missing next-message subject"))?;

    let start = Instant::now();
    let mut out = Vec::with_capacity(batch);

    while out.len() < batch {
        match sub.transport_sub.try_next() {
            Some(raw) => match classify(raw) {
                Classified::UserMessage(m) => {
                    sub.record_delivery(&m);
                    out.push(JsMessage::new(m, ctx.clone()));
                }
                _ => continue,
            },
            None => break,
        }
    }

    if out.len() >= batch {
        return Ok(out);
    }

    let mut no_wait = batch - out.len() > 1;
    let mut last_err: Option<Error> = None;

    loop {
        let elapsed = Instant::now().saturating_duration_since(start);
        let remaining = timeout_dur.saturating_sub(elapsed);
        if remaining == Duration::ZERO {
            break;
        }
        let expires = remaining.saturating_sub(Duration::from_millis(10));
        let req = NextRequest {
            batch: batch - out.len(),
            expires: expires.as_nanos() as i64,
            no_wait,
        };
        let body = serde_json::to_vec(&req)?;
        ctx.connection().publish(Message::new(&subj, body).with_reply(sub.transport_sub.subject()))?;

        let read_deadline = Instant::now() + remaining;
        let mut retry_as_long_poll = false;
        loop {
            let left = read_deadline.saturating_duration_since(Instant::now());
            if left == Duration::ZERO {
                last_err = Some(timeout("timed out waiting for pull fetch messages"));
                break;
            }
            let raw = match sub.transport_sub.next_timeout(left) {
                Ok(m) => m,
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            };
            match classify(raw) {
                Classified::UserMessage(m) => {
                    last_err = None;
                    sub.record_delivery(&m);
                    out.push(JsMessage::new(m, ctx.clone()));
                    if out.len() >= batch {
                        break;
                    }
                }
                Classified::NotFound if no_wait && out.is_empty() => {
                    debug!("pull fetch got 404 on no-wait request, retrying as a long poll");
                    retry_as_long_poll = true;
                    break;
                }
                Classified::NotFound => {
                    last_err = Some(not_found("no messages available"));
                    break;
                }
                Classified::RequestTimeout => continue,
                Classified::Unavailable => {
                    last_err = Some(Error::new(ErrorKind::Timeout, "JetStream pull request expired"));
                    break;
                }
                Classified::Other(desc) => {
                    last_err = Some(Error::new(ErrorKind::ServerError, desc));
                    break;
                }
            }
        }

        if out.len() >= batch {
            return Ok(out);
        }
        if retry_as_long_poll {
            no_wait = false;
            continue;
        }
        break;
    }

    if !out.is_empty() {
        Ok(out)
    } else {
        Err(last_err.unwrap_or_else(|| timeout("timed out waiting for pull fetch messages")))
    }
}

impl JsSubscription {
    pub fn fetch(self: &Arc<Self>, batch: usize, timeout_dur: Duration) -> Result<Vec<JsMessage>> {
        let ctx = self.ctx.clone();
        fetch(&ctx, self, batch, timeout_dur)
    }
}
