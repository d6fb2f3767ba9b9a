//! The stream context: async publish with ack correlation, and subscription
//! lifecycle with consumer binding.

pub mod ack;
pub mod admin;
pub mod config;
pub mod context;
pub(crate) mod inflight;
pub mod metadata;
pub mod options;
pub mod pull;
pub mod publish;
pub mod subscription;
pub mod types;

pub use ack::JsMessage;
pub use context::Context;
pub use options::{ContextOptions, PublishAsyncOptions, StreamInfoOptions, StreamPurgeOptions};
pub use publish::{PubAckError, PublishOptions};
pub use subscription::{Handler, JsSubscription, SubscribeOptions};
pub use types::{
    AccountInfo, AckPolicy, ConsumerConfig, ConsumerInfo, DeliverPolicy, DiscardPolicy, PubAck, ReplayPolicy, RetentionPolicy, StorageType, StreamConfig, StreamInfo,
};

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;

/// Creates a new stream context over `connection` with default options.
pub fn new(connection: Arc<dyn Connection>) -> Result<Context> {
    Context::new(connection, ContextOptions::default())
}

/// Creates a new stream context over `connection` with explicit options.
pub fn new_with_options(connection: Arc<dyn Connection>, options: ContextOptions) -> Result<Context> {
    Context::new(connection, options)
}
