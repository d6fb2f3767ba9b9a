//! In-flight async-publish bookkeeping shared under the context lock. Kept
//! as its own module because pending count, the inflight map, and the
//! stalled/waiter counters all need to move together.

use std::collections::HashMap;

use crate::connection::Message;
use crate::connection::Subscription;
use std::sync::Arc;

/// Mutable state guarded by the context's single mutex. Lazily populated on
/// the first async publish.
#[derive(Default)]
pub struct PublishState {
    pub pending: u64,
    pub stalled: u64,
    /// Count of callers blocked in `PublishAsyncComplete`.
    pub pacw: u64,
    pub inflight: HashMap<String, Message>,
    pub reply_prefix: Option<String>,
    pub reply_sub: Option<Arc<Subscription>>,
}

impl PublishState {
    /// Inserts `msg` under `token`, returning any message it displaced.
    /// Collisions are permitted (8x base62 token space, ~47.6 bits of
    /// entropy); the caller is responsible for dropping the displaced
    /// message rather than leaking it.
    pub fn insert(&mut self, token: String, msg: Message) -> Option<Message> {
        self.inflight.insert(token, msg)
    }

    pub fn remove(&mut self, token: &str) -> Option<Message> {
        self.inflight.remove(token)
    }

    /// Drains the whole map, zeroing `pending`. Returns `None` if it was
    /// already empty.
    pub fn drain(&mut self) -> Option<Vec<Message>> {
        if self.inflight.is_empty() {
            return None;
        }
        self.pending = 0;
        Some(self.inflight.drain().map(|(_, v)| v).collect())
    }
}
