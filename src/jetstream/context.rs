//! The stream context: the top-level handle tying the connection,
//! options, and async-publish state together.
//!
//! Rust's ownership model gives the context a free reference count via
//! `Arc`, so teardown just falls out of the last clone being dropped. The
//! mutex+condvar pair still earns its keep, though: the *backpressure*
//! coordination (stalled publishers, pub-ack-complete waiters) is a real
//! multi-thread rendezvous, not just a lifetime question.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::connection::Connection;
use crate::error::Result;
use crate::jetstream::inflight::PublishState;
use crate::jetstream::options::{ContextOpts, ContextOptions};

pub struct ContextInner {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) opts: ContextOpts,
    pub(crate) state: Mutex<PublishState>,
    pub(crate) cond: Condvar,
}

/// A cheap-to-clone handle onto a stream context. Cloning bumps the `Arc`
/// strong count; the last clone dropped runs `ContextInner`'s teardown.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a new stream context over `connection`. Validates options and
    /// resolves the API prefix; no connection to the server is made here —
    /// the reply subscription is lazily initialised on the first async
    /// publish.
    pub fn new(connection: Arc<dyn Connection>, options: ContextOptions) -> Result<Self> {
        let opts = ContextOpts::resolve(options)?;
        Ok(Context {
            inner: Arc::new(ContextInner {
                connection,
                opts,
                state: Mutex::new(PublishState::default()),
                cond: Condvar::new(),
            }),
        })
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.inner.connection
    }

    pub fn prefix(&self) -> &str {
        &self.inner.opts.prefix
    }

    pub fn wait(&self) -> Duration {
        self.inner.opts.wait
    }

    /// Effective request timeout: `override_wait` if given and positive,
    /// else the context's configured `wait`.
    pub(crate) fn effective_wait(&self, override_wait: Option<Duration>) -> Duration {
        match override_wait {
            Some(d) if d > Duration::ZERO => d,
            _ => self.inner.opts.wait,
        }
    }

    pub(crate) fn api_subject(&self, suffix: &str) -> String {
        format!("{}.{}", self.inner.opts.prefix, suffix)
    }
}
