//! An in-process fake [`Connection`] for integration tests: no sockets, no
//! server process. Publishes that land on a subject with a live subscriber
//! are delivered locally; requests are answered by handlers registered with
//! [`MockConnection::on_request`], keyed by an exact subject or a
//! trailing-`*` prefix (matching how the stream context subscribes to its
//! async-publish reply prefix).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use corestream::connection::{Connection, Headers, Message, Subscription};
use corestream::error::{Error, ErrorKind, Result};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

type RequestHandler = Arc<dyn Fn(&Message) -> Message + Send + Sync>;

struct Registered {
    pattern: String,
    sender: Sender<Message>,
}

fn matches(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => subject.starts_with(prefix),
        None => pattern == subject,
    }
}

#[derive(Default)]
struct Inner {
    subs: Vec<Registered>,
    handlers: HashMap<String, RequestHandler>,
    published: Vec<Message>,
}

/// A fake bus connection: local pub/sub fan-out plus scripted request/reply.
pub struct MockConnection {
    inner: Mutex<Inner>,
    inbox_seq: std::sync::atomic::AtomicU64,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(MockConnection {
            inner: Mutex::new(Inner::default()),
            inbox_seq: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Registers a canned responder for requests whose subject matches
    /// `pattern` (exact, or a `prefix.*` wildcard). Later registrations for
    /// the same pattern replace earlier ones.
    pub fn on_request(&self, pattern: impl Into<String>, handler: impl Fn(&Message) -> Message + Send + Sync + 'static) {
        self.inner.lock().handlers.insert(pattern.into(), Arc::new(handler));
    }

    /// All messages ever passed to [`Connection::publish`], in order.
    pub fn published(&self) -> Vec<Message> {
        self.inner.lock().published.clone()
    }
}

impl Connection for MockConnection {
    fn publish(&self, msg: Message) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.published.push(msg.clone());
        for reg in &inner.subs {
            if matches(&reg.pattern, &msg.subject) {
                let _ = reg.sender.send(msg.clone());
            }
        }
        Ok(())
    }

    fn request(&self, subject: &str, headers: Option<Headers>, data: &[u8], wait: Duration) -> Result<Message> {
        let mut req = Message::new(subject, data.to_vec());
        req.headers = headers;

        let handler: Option<RequestHandler> = {
            let inner = self.inner.lock();
            inner.handlers.iter().find(|(pattern, _)| matches(pattern, subject)).map(|(_, h)| h.clone())
        };
        match handler {
            Some(h) => Ok(h(&req)),
            None => {
                let _ = wait;
                Ok(Message {
                    subject: subject.to_string(),
                    reply: None,
                    headers: None,
                    data: Vec::new(),
                    no_responders: true,
                })
            }
        }
    }

    fn subscribe(&self, subject: &str) -> Result<Arc<Subscription>> {
        let (tx, rx) = unbounded();
        self.inner.lock().subs.push(Registered {
            pattern: subject.to_string(),
            sender: tx,
        });
        Ok(Arc::new(Subscription::new(subject, rx)))
    }

    fn queue_subscribe(&self, subject: &str, _queue: &str) -> Result<Arc<Subscription>> {
        self.subscribe(subject)
    }

    fn new_inbox(&self) -> String {
        let n = self.inbox_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("{}{}.{}", self.inbox_prefix(), nuid::next(), n)
    }

    fn inbox_prefix(&self) -> &str {
        "_INBOX."
    }
}

#[allow(dead_code)]
pub fn server_error(code: i64, err_code: u64, description: &str) -> Vec<u8> {
    serde_json::json!({ "error": { "code": code, "err_code": err_code, "description": description } })
        .to_string()
        .into_bytes()
}

#[allow(dead_code)]
pub fn timeout_error() -> Error {
    Error::new(ErrorKind::Timeout, "mock connection request timed out")
}
