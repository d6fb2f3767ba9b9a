//! Context options and API-prefix resolution.

use std::time::Duration;

use crate::error::Result;

pub const DEFAULT_API_PREFIX: &str = "$JS.API";
pub const DEFAULT_WAIT: Duration = Duration::from_millis(5000);
pub const DEFAULT_STALL_WAIT: Duration = Duration::from_millis(200);
pub(crate) const DEFAULT_MAX_ACK_PENDING: i64 = 20_000;

/// Callback invoked for per-message ack errors. Takes the failed publish by
/// value: the handler owns the message and may resubmit it, rather than the
/// crate needing a "did the caller take it" flag.
pub type ErrHandler = std::sync::Arc<dyn Fn(&crate::jetstream::Context, crate::jetstream::publish::PubAckError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct PublishAsyncOptions {
    pub max_pending: u64,
    pub stall_wait: Option<Duration>,
    pub err_handler: Option<ErrHandler>,
}

#[derive(Clone, Default)]
pub struct StreamPurgeOptions {
    pub subject: Option<String>,
    pub sequence: u64,
    pub keep: u64,
}

#[derive(Clone, Default)]
pub struct StreamInfoOptions {
    pub deleted_details: bool,
}

/// User-supplied options passed to the context constructor. Everything is
/// optional; unset fields take documented defaults.
#[derive(Clone, Default)]
pub struct ContextOptions {
    pub domain: Option<String>,
    pub prefix: Option<String>,
    pub wait: Option<Duration>,
    pub publish_async: PublishAsyncOptions,
    pub stream_purge: StreamPurgeOptions,
    pub stream_info: StreamInfoOptions,
}

/// Resolved, immutable options carried by a live [`crate::jetstream::Context`].
#[derive(Clone)]
pub struct ContextOpts {
    pub prefix: String,
    pub wait: Duration,
    pub publish_async: PublishAsyncOptions,
    pub stream_purge: StreamPurgeOptions,
    pub stream_info: StreamInfoOptions,
}

fn without_trailing_dot(s: &str) -> &str {
    s.strip_suffix('.').unwrap_or(s)
}

impl ContextOpts {
    /// Resolves construction-time options. `Wait`/`StallWait` are expressed
    /// as `Duration`, which is unsigned, so the usual "must be non-negative"
    /// validation is unrepresentable here and is dropped rather than faked.
    /// Defaults are applied *after* copying: `wait=5000ms`, `stall_wait=200ms`.
    pub fn resolve(opts: ContextOptions) -> Result<Self> {
        let prefix = if let Some(domain) = opts.domain.as_deref().filter(|d| !d.is_empty()) {
            format!("$JS.{}.API", without_trailing_dot(domain))
        } else if let Some(prefix) = opts.prefix.as_deref().filter(|p| !p.is_empty()) {
            without_trailing_dot(prefix).to_string()
        } else {
            DEFAULT_API_PREFIX.to_string()
        };

        Ok(ContextOpts {
            prefix,
            wait: opts.wait.unwrap_or(DEFAULT_WAIT),
            publish_async: PublishAsyncOptions {
                max_pending: opts.publish_async.max_pending,
                stall_wait: Some(opts.publish_async.stall_wait.unwrap_or(DEFAULT_STALL_WAIT)),
                err_handler: opts.publish_async.err_handler,
            },
            stream_purge: opts.stream_purge,
            stream_info: opts.stream_info,
        })
    }

    pub fn stall_wait(&self) -> Duration {
        self.publish_async.stall_wait.unwrap_or(DEFAULT_STALL_WAIT)
    }
}
