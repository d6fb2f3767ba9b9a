//! Subscription creation: stream resolution, consumer discovery/creation,
//! config negotiation, delivery subscription, heartbeat monitoring, flow
//! control, sequence-mismatch tracking, and the auto-ack wrapper.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use regex::Regex;

use crate::connection::{Message, Subscription};
use crate::error::{invalid_arg, not_found, Error, ErrorKind, Result};
use crate::jetstream::ack::JsMessage;
use crate::jetstream::admin;
use crate::jetstream::config;
use crate::jetstream::context::Context;
use crate::jetstream::metadata::{self, Fields};
use crate::jetstream::options;
use crate::jetstream::types::{AckPolicy, ConsumerConfig, ConsumerInfo, DeliverPolicy};

const JS_ACK_PREFIX: &str = "$JS.ACK.";
const IDLE_HEARTBEAT_STATUS: &str = "100";

/// A durable/consumer name may not contain a path separator, whitespace, or
/// a subject wildcard token -- it becomes a literal subject token in
/// `$JS.API.CONSUMER.*` requests and in the pull next-message subject.
static VALID_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^.*>\s/\\]+$").unwrap());

fn validate_name(field: &str, name: &str) -> Result<()> {
    if !VALID_NAME.is_match(name) {
        return Err(invalid_arg(format!("{} '{}' contains an invalid character", field, name)));
    }
    Ok(())
}

pub type Handler = Arc<dyn Fn(&JsMessage) + Send + Sync>;

/// What the caller asked for when creating or attaching to a subscription.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Binds to a known stream instead of resolving one by subject.
    pub stream: Option<String>,
    /// Attaches to a known consumer by name instead of creating one.
    pub consumer: Option<String>,
    pub queue: Option<String>,
    pub config: ConsumerConfig,
    /// When `true`, a push subscription's messages are not auto-acked.
    pub manual_ack: bool,
}

/// Per-subscription bookkeeping guarded by its own lock.
struct JsSubState {
    stream: String,
    consumer: String,
    next_msg_subject: Option<String>,
    cmeta: Option<String>,
    fc_reply: Option<String>,
    fc_delivered: u64,
    active: bool,
    sm: bool,
    ssmn: bool,
    sseq: u64,
    dseq: u64,
    ldseq: u64,
    delivered: u64,
    pull: bool,
    delete_consumer_on_unsub: bool,
}

/// A live JetStream-style subscription. Push subscriptions can be read with
/// [`JsSubscription::next_timeout`] (sync mode) or driven by a handler
/// passed to [`Context::subscribe`]; pull subscriptions are read with
/// [`crate::jetstream::pull::fetch`].
pub struct JsSubscription {
    pub(crate) ctx: Context,
    pub(crate) transport_sub: Arc<Subscription>,
    state: Mutex<JsSubState>,
    hb_stop: Arc<(Mutex<bool>, Condvar)>,
    hb_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    missed_heartbeats: AtomicU64,
    closed: AtomicBool,
}

impl JsSubscription {
    pub fn stream(&self) -> String {
        self.state.lock().stream.clone()
    }

    pub fn consumer(&self) -> String {
        self.state.lock().consumer.clone()
    }

    pub fn is_pull(&self) -> bool {
        self.state.lock().pull
    }

    /// `true` if this subscription created its consumer and will delete it
    /// on unsubscribe; `false` if it bound to one that already existed.
    pub fn owns_consumer(&self) -> bool {
        self.state.lock().delete_consumer_on_unsub
    }

    /// Count of heartbeat intervals where no traffic was observed. Exposed
    /// for tests rather than routed through an async error handler, since
    /// this crate has no connection-level async error sink to post to (see
    /// DESIGN.md).
    pub fn missed_heartbeats(&self) -> u64 {
        self.missed_heartbeats.load(Ordering::SeqCst)
    }

    /// The last observed `(stream_seq, consumer_seq, server_expected_seq)`.
    /// The second and third only disagree while [`Self::has_sequence_mismatch`]
    /// is `true`.
    pub fn sequence_mismatch(&self) -> (u64, u64, u64) {
        let st = self.state.lock();
        (st.sseq, st.dseq, st.ldseq)
    }

    pub fn has_sequence_mismatch(&self) -> bool {
        let st = self.state.lock();
        st.dseq != st.ldseq
    }

    pub(crate) fn next_msg_subject(&self) -> Option<String> {
        self.state.lock().next_msg_subject.clone()
    }

    /// Applies sequence-tracking/flow-control bookkeeping for a message
    /// already known to be a user delivery (used by pull fetch, which
    /// classifies status replies itself before calling this).
    pub(crate) fn record_delivery(&self, raw: &Message) {
        let mut st = self.state.lock();
        record_user_delivery(&mut st, raw);
        if let Some(fc_reply) = &st.fc_reply {
            if st.delivered >= st.fc_delivered {
                let fc_reply = fc_reply.clone();
                st.fc_reply = None;
                drop(st);
                if let Err(e) = self.ctx.connection().publish(Message::new(fc_reply, Vec::new())) {
                    warn!("failed to send flow control response: {}", e);
                }
            }
        }
    }

    /// Blocking receive with a deadline for a sync/push subscription.
    /// Internally retries past heartbeat/flow-control control messages.
    pub fn next_timeout(&self, timeout: Duration) -> Result<JsMessage> {
        if self.is_pull() {
            return Err(Error::new(ErrorKind::InvalidSubscription, "not a push subscription"));
        }
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining == Duration::ZERO {
                return Err(crate::error::timeout("timed out waiting for message"));
            }
            let raw = self.transport_sub.next_timeout(remaining)?;
            if let Some(user_msg) = process_delivered(self, raw) {
                return Ok(JsMessage::new(user_msg, self.ctx.clone()));
            }
        }
    }

    fn start_heartbeat_timer(self: &Arc<Self>, interval: Duration) {
        let sub = Arc::downgrade(self);
        let stop = self.hb_stop.clone();
        let join = std::thread::spawn(move || loop {
            let mut guard = stop.0.lock();
            let timed_out = stop.1.wait_for(&mut guard, interval).timed_out();
            if *guard {
                return;
            }
            drop(guard);
            if !timed_out {
                continue;
            }
            let Some(sub) = sub.upgrade() else { return };
            let was_active = {
                let mut st = sub.state.lock();
                let was = st.active;
                st.active = false;
                was
            };
            if !was_active {
                sub.missed_heartbeats.fetch_add(1, Ordering::SeqCst);
                warn!("missed heartbeat on consumer '{}'", sub.consumer());
            }
        });
        *self.hb_thread.lock() = Some(join);
    }

    fn stop_heartbeat_timer(&self) {
        {
            let mut guard = self.hb_stop.0.lock();
            *guard = true;
        }
        self.hb_stop.1.notify_all();
        if let Some(join) = self.hb_thread.lock().take() {
            let _ = join.join();
        }
    }
}

impl Drop for JsSubscription {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_heartbeat_timer();
        let delete = {
            let st = self.state.lock();
            st.delete_consumer_on_unsub.then(|| (st.stream.clone(), st.consumer.clone()))
        };
        if let Some((stream, consumer)) = delete {
            if let Err(e) = admin::delete_consumer(&self.ctx, &stream, &consumer, self.ctx.wait()) {
                debug!("failed to delete consumer '{}' on unsubscribe: {}", consumer, e);
            }
        }
    }
}

/// Applies the heartbeat/flow-control/sequence-tracking side effects of one
/// raw delivery and returns the payload iff it's a user message. Control
/// messages (`Status: 100`) are consumed and `None` is returned.
fn process_delivered(sub: &JsSubscription, raw: Message) -> Option<Message> {
    let is_control = raw.header(crate::headers::STATUS) == Some(IDLE_HEARTBEAT_STATUS);

    if is_control {
        let mut st = sub.state.lock();
        st.active = true;
        if let Some(cmeta) = &st.cmeta {
            match metadata::parse(cmeta, Fields::Sequences) {
                Ok(md) => {
                    st.sseq = md.stream_seq;
                    st.dseq = md.consumer_seq;
                }
                Err(e) => warn!("invalid cached JetStream ack metadata '{}': {}", cmeta, e),
            }
        }
        if let Some(last) = raw.header(crate::headers::NATS_LAST_CONSUMER) {
            if let Ok(v) = last.parse::<u64>() {
                st.ldseq = v;
            }
        }
        if st.ldseq == st.dseq {
            st.sm = false;
            st.ssmn = false;
        } else if !st.ssmn {
            st.sm = true;
            st.ssmn = true;
            warn!("JetStream consumer sequence mismatch: stream={} client={} server={}", st.sseq, st.dseq, st.ldseq);
        }

        if let Some(reply) = &raw.reply {
            let queue_depth = sub.transport_sub.pending_count() as u64;
            st.fc_reply = Some(reply.clone());
            st.fc_delivered = st.delivered + queue_depth;
        }
        return None;
    }

    let mut st = sub.state.lock();
    record_user_delivery(&mut st, &raw);
    let fc_due = st.fc_reply.as_ref().is_some_and(|_| st.delivered >= st.fc_delivered);
    let fc_reply = if fc_due { st.fc_reply.take() } else { None };
    drop(st);

    if let Some(fc_reply) = fc_reply {
        if let Err(e) = sub.ctx.connection().publish(Message::new(fc_reply, Vec::new())) {
            warn!("failed to send flow control response: {}", e);
        }
    }

    Some(raw)
}

fn record_user_delivery(st: &mut JsSubState, raw: &Message) {
    if let Some(reply) = &raw.reply {
        if let Some(tail) = reply.strip_prefix(JS_ACK_PREFIX) {
            st.active = true;
            st.cmeta = Some(tail.to_string());
        }
    }
    st.delivered += 1;
}

/// Validates the server's consumer config against what the caller asked
/// for, returning the push deliver subject (`None` for pull) on success.
fn process_cons_info(info: &ConsumerInfo, user_cfg: &ConsumerConfig, is_pull_mode: bool, subject: &str, queue: Option<&str>) -> Result<Option<String>> {
    let ccfg = &info.config;

    if let Some(filter) = ccfg.filter_subject.as_deref().filter(|f| !f.is_empty()) {
        if filter != subject {
            return Err(invalid_arg(format!("subject '{}' does not match consumer filter subject '{}'", subject, filter)));
        }
    }

    let queue = queue.filter(|q| !q.is_empty());
    if queue.is_some() {
        if ccfg.heartbeat.unwrap_or(0) > 0 {
            return Err(invalid_arg("heartbeat is not supported for queue subscriptions"));
        }
        if ccfg.flow_control {
            return Err(invalid_arg("flow control is not supported for queue subscriptions"));
        }
    }

    let deliver_subject = ccfg.deliver_subject.clone().filter(|d| !d.is_empty());
    if is_pull_mode && deliver_subject.is_some() {
        return Err(invalid_arg("cannot pull subscribe to a push consumer"));
    }
    if !is_pull_mode && deliver_subject.is_none() {
        return Err(invalid_arg("must use pull subscribe to bind to this consumer"));
    }

    if is_pull_mode {
        config::check(ccfg, user_cfg)?;
        return Ok(None);
    }

    let deliver_group = ccfg.deliver_group.as_deref().filter(|g| !g.is_empty());
    match (deliver_group, queue) {
        (None, Some(_)) => {
            return Err(invalid_arg("cannot create a queue subscription for a consumer without a deliver group"));
        }
        (None, None) if info.push_bound => {
            return Err(invalid_arg("consumer is already bound to a subscription"));
        }
        (Some(dg), None) => {
            return Err(invalid_arg(format!("cannot create a subscription for a consumer with a deliver group '{}'", dg)));
        }
        (Some(dg), Some(q)) if dg != q => {
            return Err(invalid_arg(format!("cannot create a queue subscription '{}' for a consumer with a deliver group '{}'", q, dg)));
        }
        _ => {}
    }

    config::check(ccfg, user_cfg)?;
    Ok(deliver_subject)
}

fn dispatch_push(sub: &Arc<JsSubscription>, raw: Message, handler: &Handler, auto_ack: bool) {
    let Some(user_msg) = process_delivered(sub, raw) else { return };
    let jsmsg = JsMessage::new(user_msg, sub.ctx.clone());
    handler(&jsmsg);
    if auto_ack {
        if let Err(e) = jsmsg.ack() {
            warn!("auto-ack failed: {}", e);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn subscribe_internal(ctx: &Context, subject: &str, pull_durable: Option<&str>, handler: Option<Handler>, is_pull_mode: bool, opts: SubscribeOptions) -> Result<Arc<JsSubscription>> {
    if subject.is_empty() {
        return Err(invalid_arg("subject required"));
    }

    let mut cfg_opts = opts.config.clone();
    if cfg_opts.opt_start_seq.unwrap_or(0) > 0 {
        cfg_opts.deliver_policy = DeliverPolicy::ByStartSequence;
    }
    if cfg_opts.opt_start_time.unwrap_or(0) > 0 {
        cfg_opts.deliver_policy = DeliverPolicy::ByStartTime;
    }

    let queue = opts.queue.clone().filter(|q| !q.is_empty());
    if queue.is_some() {
        if cfg_opts.heartbeat.unwrap_or(0) > 0 {
            return Err(invalid_arg("heartbeat is not supported for queue subscriptions"));
        }
        if cfg_opts.flow_control {
            return Err(invalid_arg("flow control is not supported for queue subscriptions"));
        }
    }

    let mut durable = pull_durable.map(str::to_string).or_else(|| cfg_opts.durable_name.clone()).filter(|d| !d.is_empty());
    let mut consumer = opts.consumer.clone().filter(|c| !c.is_empty());
    let stream_bound = opts.stream.clone().filter(|s| !s.is_empty());
    let cons_bound = stream_bound.is_some() && consumer.is_some();

    if let Some(d) = &durable {
        validate_name("durable name", d)?;
    }
    if consumer.is_none() {
        if queue.is_some() && durable.is_none() {
            durable = queue.clone();
        }
        consumer = durable.clone();
    }
    if let Some(c) = &consumer {
        validate_name("consumer name", c)?;
    }

    let stream = match stream_bound {
        Some(s) => s,
        None => admin::lookup_stream_by_subject(ctx, subject, ctx.wait())?,
    };

    let mut info: Option<ConsumerInfo> = None;
    let mut lookup_err = false;
    let mut lookup_failed: Option<Error> = None;
    if let Some(c) = &consumer {
        match admin::get_consumer_info(ctx, &stream, c, ctx.wait()) {
            Ok(i) => info = Some(i),
            Err(e) => {
                lookup_err = e.kind() == ErrorKind::Timeout || matches!(e.code(), Some(code) if code == admin::JS_NOT_ENABLED_ERR);
                if e.kind() != ErrorKind::NotFound {
                    lookup_failed = Some(e);
                }
            }
        }
    }

    'process_info: loop {
        let (deliver_subject, create_cfg, hb_interval_ms) = if let Some(i) = &info {
            let deliver = process_cons_info(i, &cfg_opts, is_pull_mode, subject, queue.as_deref())?;
            (deliver, None, i.config.heartbeat.unwrap_or(0) / 1_000_000)
        } else if lookup_failed.is_some() || (cons_bound && !(is_pull_mode && lookup_err)) {
            if let Some(e) = lookup_failed {
                return Err(e);
            }
            return Err(not_found(format!("consumer '{}' not found", consumer.clone().unwrap_or_default())));
        } else {
            let mut cfg = cfg_opts.clone();
            let mut deliver = None;
            if !is_pull_mode {
                deliver = Some(ctx.connection().new_inbox());
                cfg.deliver_subject = deliver.clone();
            }
            cfg.durable_name = durable.clone();
            cfg.deliver_group = queue.clone();
            cfg.filter_subject = Some(subject.to_string());
            if cfg.max_ack_pending.unwrap_or(0) == 0 && cfg.ack_policy != AckPolicy::None {
                cfg.max_ack_pending = Some(options::DEFAULT_MAX_ACK_PENDING);
            }
            let hbms = cfg.heartbeat.unwrap_or(0) / 1_000_000;
            (deliver, Some(cfg), hbms)
        };

        let transport_deliver = if is_pull_mode {
            ctx.connection().new_inbox()
        } else {
            deliver_subject.clone().ok_or_else(|| Error::new(ErrorKind::IllegalState, "push consumer has no deliver subject"))?
        };

        let transport_sub = match &queue {
            Some(q) if !is_pull_mode => ctx.connection().queue_subscribe(&transport_deliver, q)?,
            _ => ctx.connection().subscribe(&transport_deliver)?,
        };

        let consumer_name = consumer.clone().unwrap_or_default();
        let state = Mutex::new(JsSubState {
            stream: stream.clone(),
            consumer: consumer_name.clone(),
            next_msg_subject: if is_pull_mode {
                Some(format!("{}.CONSUMER.MSG.NEXT.{}.{}", ctx.prefix(), stream, consumer_name))
            } else {
                None
            },
            cmeta: None,
            fc_reply: None,
            fc_delivered: 0,
            active: false,
            sm: false,
            ssmn: false,
            sseq: 0,
            dseq: 0,
            ldseq: 0,
            delivered: 0,
            pull: is_pull_mode,
            delete_consumer_on_unsub: false,
        });

        let sub = Arc::new(JsSubscription {
            ctx: ctx.clone(),
            transport_sub: transport_sub.clone(),
            state,
            hb_stop: Arc::new((Mutex::new(false), Condvar::new())),
            hb_thread: Mutex::new(None),
            missed_heartbeats: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        if let Some(h) = &handler {
            let auto_ack = !opts.manual_ack && cfg_opts.ack_policy != AckPolicy::None;
            let sub_for_cb = sub.clone();
            let user_handler = h.clone();
            transport_sub.with_handler(move |raw| {
                dispatch_push(&sub_for_cb, raw, &user_handler, auto_ack);
            });
        }

        if hb_interval_ms > 0 {
            sub.start_heartbeat_timer(Duration::from_millis(hb_interval_ms as u64 * 2));
        }

        if let Some(cfg) = create_cfg {
            match admin::add_consumer(ctx, &stream, &cfg, ctx.wait()) {
                Ok(created) => {
                    let mut st = sub.state.lock();
                    st.delete_consumer_on_unsub = true;
                    st.consumer = created.name.clone();
                    drop(st);
                    return Ok(sub);
                }
                Err(e) if admin::is_consumer_exists_race(&e) => {
                    sub.stop_heartbeat_timer();
                    drop(sub);
                    let refreshed = admin::get_consumer_info(ctx, &stream, consumer.as_deref().unwrap_or_default(), ctx.wait())?;
                    info = Some(refreshed);
                    continue 'process_info;
                }
                Err(e) => return Err(e),
            }
        }

        return Ok(sub);
    }
}

impl Context {
    /// Push subscription with an async message handler. Auto-acks unless
    /// `opts.manual_ack` is set and the consumer's ack policy isn't `None`.
    pub fn subscribe(&self, subject: &str, opts: SubscribeOptions, handler: Handler) -> Result<Arc<JsSubscription>> {
        subscribe_internal(self, subject, None, Some(handler), false, opts)
    }

    /// Push subscription read synchronously via [`JsSubscription::next_timeout`].
    pub fn subscribe_sync(&self, subject: &str, opts: SubscribeOptions) -> Result<Arc<JsSubscription>> {
        subscribe_internal(self, subject, None, None, false, opts)
    }

    /// Pull subscription read via [`crate::jetstream::pull::fetch`].
    /// `durable` is required: pull consumers in this crate are always named.
    pub fn pull_subscribe(&self, subject: &str, durable: &str, opts: SubscribeOptions) -> Result<Arc<JsSubscription>> {
        if durable.is_empty() {
            return Err(invalid_arg("pull subscriptions require a durable name"));
        }
        subscribe_internal(self, subject, Some(durable), None, true, opts)
    }
}
