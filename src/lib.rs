//! A client-side core for a durable stream/consumer subsystem layered over
//! a publish/subscribe bus: async publish with ack correlation, and
//! subscription lifecycle with consumer binding, heartbeat monitoring, flow
//! control, and sequence-mismatch tracking.
//!
//! The bus itself -- TCP/TLS, reconnect, wire framing, request/reply,
//! subscribe -- is out of scope. This crate is written against the
//! [`connection::Connection`] trait; production users plug in a real
//! connection, and this crate's own test suite plugs in an in-process fake
//! (see `tests/support/mock_connection.rs`).
//!
//! The entry point is [`jetstream::Context`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use corestream::connection::Connection;
//! use corestream::jetstream;
//!
//! # fn example(connection: Arc<dyn Connection>) -> corestream::error::Result<()> {
//! let ctx = jetstream::new(connection)?;
//! ctx.publish("ORDERS.new", b"hello".to_vec(), Default::default())?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod headers;
pub mod inbox;
pub mod jetstream;

pub use connection::{Connection, Message, Subscription};
pub use error::{Error, ErrorKind, Result};
pub use headers::Headers;
pub use jetstream::{Context, JsMessage, JsSubscription};
