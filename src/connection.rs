//! The transport boundary.
//!
//! Everything in this module is an *opaque collaborator*: request/reply,
//! subscribe, publish, no-responders detection, and inbox generation are
//! someone else's concern. This crate ships the trait and the
//! plumbing types (`Message`, `Headers`, `Subscription`) because the stream
//! context needs a concrete shape to be written against and tested, but it
//! ships no TCP/TLS/wire-protocol implementation. Production users plug in
//! a real connection; `tests/support/mock_connection.rs` plugs in a fake
//! one for this crate's own test suite.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::error::{timeout, Error, ErrorKind, Result};
pub use crate::headers::Headers;

/// A message as delivered by, or published to, the underlying transport.
#[derive(Debug, Clone)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Option<Headers>,
    pub data: Vec<u8>,
    /// Set by the transport when a request found no subscriber at all,
    /// rather than a subscriber that replied with an empty body.
    pub no_responders: bool,
}

impl Message {
    pub fn new(subject: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Message {
            subject: subject.into(),
            reply: None,
            headers: None,
            data: data.into(),
            no_responders: false,
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|h| h.get(name))
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.get_or_insert_with(Headers::new).insert(name, value);
    }
}

/// A handle to a live subscription on the transport.
///
/// Supports two consumption styles: pull one message at a time with a
/// deadline (`next_timeout`, `try_next`), or hand the subscription to a
/// background thread that calls a closure per message (`with_handler`).
pub struct Subscription {
    pub(crate) subject: String,
    receiver: Receiver<Message>,
    handler_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    handler_thread_id: Mutex<Option<std::thread::ThreadId>>,
    stop: Arc<parking_lot::Mutex<bool>>,
    on_unsubscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("subject", &self.subject).finish()
    }
}

impl Subscription {
    pub fn new(subject: impl Into<String>, receiver: Receiver<Message>) -> Self {
        Subscription {
            subject: subject.into(),
            receiver,
            handler_thread: Mutex::new(None),
            handler_thread_id: Mutex::new(None),
            stop: Arc::new(parking_lot::Mutex::new(false)),
            on_unsubscribe: Mutex::new(None),
        }
    }

    pub fn on_unsubscribe(&self, f: impl FnOnce() + Send + 'static) {
        *self.on_unsubscribe.lock() = Some(Box::new(f));
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Number of messages already buffered and not yet consumed. Used to
    /// compute the flow-control delivery threshold.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Non-blocking receive; used by pull-fetch to drain already-buffered
    /// messages before issuing a new batch request.
    pub fn try_next(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Blocking receive with a deadline. Returns `Err(Timeout)` rather than
    /// `None` so callers can distinguish "nothing arrived" from "closed".
    pub fn next_timeout(&self, timeout_dur: Duration) -> Result<Message> {
        match self.receiver.recv_timeout(timeout_dur) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => Err(timeout("timed out waiting for message")),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::new(ErrorKind::InvalidSubscription, "subscription closed"))
            }
        }
    }

    /// Blocks indefinitely for the next message.
    pub fn next(&self) -> Option<Message> {
        self.receiver.recv().ok()
    }

    /// Spawns a background thread that invokes `handler` for every delivered
    /// message until the subscription is dropped.
    pub fn with_handler<F>(self: Arc<Self>, handler: F) -> Arc<Self>
    where
        F: Fn(Message) + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let stop = self.stop.clone();
        let join = std::thread::spawn(move || loop {
            match receiver.recv_timeout(Duration::from_millis(200)) {
                Ok(msg) => handler(msg),
                Err(RecvTimeoutError::Timeout) => {
                    if *stop.lock() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        });
        *self.handler_thread_id.lock() = Some(join.thread().id());
        *self.handler_thread.lock() = Some(join);
        self
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        *self.stop.lock() = true;
        // If the last strong reference keeping this subscription alive is
        // being dropped from inside the handler's own dispatch callback
        // (e.g. an async-publish ack handler whose upgraded `Context` was
        // the final owner), joining here would deadlock the thread against
        // itself. Only join when some other thread is doing the dropping.
        let joining_from_handler_thread = *self.handler_thread_id.lock() == Some(std::thread::current().id());
        if !joining_from_handler_thread {
            if let Some(join) = self.handler_thread.lock().take() {
                let _ = join.join();
            }
        }
        if let Some(f) = self.on_unsubscribe.lock().take() {
            f();
        }
    }
}

/// The transport trait the stream context is written against.
///
/// Implementors own the real connection (TCP/TLS socket, reconnect state,
/// wire protocol framing) -- none of which is this crate's concern. Every
/// method here corresponds 1:1 to an external request/reply or subscribe
/// operation the stream context needs from the underlying bus.
pub trait Connection: Send + Sync {
    /// Fire-and-forget publish.
    fn publish(&self, msg: Message) -> Result<()>;

    /// Request/reply with a deadline. Used for AddConsumer/GetConsumerInfo/
    /// DeleteConsumer/Streams-lookup and for `AckSync`.
    fn request(&self, subject: &str, headers: Option<Headers>, data: &[u8], wait: Duration) -> Result<Message>;

    /// Subscribes to `subject`, returning a handle the caller can drain or
    /// wire to a background handler.
    fn subscribe(&self, subject: &str) -> Result<Arc<Subscription>>;

    /// Subscribes to `subject` as part of queue group `queue`.
    fn queue_subscribe(&self, subject: &str, queue: &str) -> Result<Arc<Subscription>>;

    /// Allocates a fresh, globally-unique inbox subject.
    fn new_inbox(&self) -> String;

    /// The stable per-connection inbox prefix (e.g. `_INBOX.<nuid>`) used to
    /// derive the per-context async-publish reply prefix.
    fn inbox_prefix(&self) -> &str;
}
