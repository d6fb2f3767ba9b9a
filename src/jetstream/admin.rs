//! The administrative request/reply surface: AddConsumer, GetConsumerInfo,
//! DeleteConsumer, and stream-by-subject lookup. The *bodies* of these calls
//! (subject shapes, JSON envelopes, error classification) are very much in
//! scope -- what's out of scope is the wire transport underneath `request`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{not_found, Error, ErrorKind, Result};
use crate::jetstream::context::Context;
use crate::jetstream::types::{ApiResponse, ConsumerConfig, ConsumerInfo, CreateConsumerRequest, StreamNamesResponse, StreamRequest};

/// Sends a JSON request to `<prefix>.<suffix>` and decodes the response,
/// surfacing a `ServerError` if the API responded with an `"error"` object.
fn request_api<B: Serialize, T: DeserializeOwned>(ctx: &Context, suffix: &str, body: &B, wait: Duration) -> Result<T> {
    let subject = ctx.api_subject(suffix);
    let payload = serde_json::to_vec(body)?;
    let resp = ctx.connection().request(&subject, None, &payload, wait)?;

    if resp.no_responders {
        return Err(Error::new(ErrorKind::NoResponders, format!("no responders available for '{}'", subject)));
    }

    let envelope: ApiResponse = serde_json::from_slice(&resp.data)?;
    if let Some(err) = envelope.error {
        if err.code == 404 || err.err_code == JS_CONSUMER_NOT_FOUND_ERR || err.err_code == JS_STREAM_NOT_FOUND_ERR {
            return Err(not_found(err.description));
        }
        return Err(Error::with_code(ErrorKind::ServerError, err.description, err.err_code));
    }

    Ok(serde_json::from_slice(&resp.data)?)
}

/// Looks up the single stream whose subject filter covers `subject` by
/// calling `<prefix>.STREAM.NAMES`.
pub fn lookup_stream_by_subject(ctx: &Context, subject: &str, wait: Duration) -> Result<String> {
    let req = StreamRequest {
        subject: Some(subject.to_string()),
    };
    let resp: StreamNamesResponse = request_api(ctx, "STREAM.NAMES", &req, wait)?;
    resp.streams.into_iter().next().ok_or_else(|| not_found(format!("no stream matches subject '{}'", subject)))
}

/// `<prefix>.CONSUMER.INFO.<stream>.<consumer>`.
pub fn get_consumer_info(ctx: &Context, stream: &str, consumer: &str, wait: Duration) -> Result<ConsumerInfo> {
    let suffix = format!("CONSUMER.INFO.{}.{}", stream, consumer);
    request_api(ctx, &suffix, &(), wait)
}

/// `<prefix>.CONSUMER.DURABLE.CREATE.<stream>.<durable>` when a durable name
/// is set, else `<prefix>.CONSUMER.CREATE.<stream>` for ephemerals.
pub fn add_consumer(ctx: &Context, stream: &str, cfg: &ConsumerConfig, wait: Duration) -> Result<ConsumerInfo> {
    let suffix = match cfg.durable_name.as_deref() {
        Some(durable) if !durable.is_empty() => format!("CONSUMER.DURABLE.CREATE.{}.{}", stream, durable),
        _ => format!("CONSUMER.CREATE.{}", stream),
    };
    let req = CreateConsumerRequest {
        stream_name: stream.to_string(),
        config: cfg.clone(),
    };
    request_api(ctx, &suffix, &req, wait)
}

/// `<prefix>.CONSUMER.DELETE.<stream>.<consumer>`.
pub fn delete_consumer(ctx: &Context, stream: &str, consumer: &str, wait: Duration) -> Result<()> {
    let suffix = format!("CONSUMER.DELETE.{}.{}", stream, consumer);
    let _: serde_json::Value = request_api(ctx, &suffix, &(), wait)?;
    Ok(())
}

/// True when the server's error indicates "a consumer with this durable name
/// already exists" or "is already bound" -- the create-race the subscription
/// factory recovers from by re-fetching and attaching.
pub fn is_consumer_exists_race(err: &Error) -> bool {
    err.kind() == ErrorKind::ServerError
        && matches!(err.code(), Some(code) if code == JS_CONSUMER_NAME_EXIST_ERR || code == JS_CONSUMER_EXISTING_ACTIVE_ERR)
}

pub const JS_CONSUMER_NAME_EXIST_ERR: u64 = 10013;
pub const JS_CONSUMER_EXISTING_ACTIVE_ERR: u64 = 10105;
pub const JS_NOT_ENABLED_ERR: u64 = 10076;
pub const JS_CONSUMER_NOT_FOUND_ERR: u64 = 10014;
pub const JS_STREAM_NOT_FOUND_ERR: u64 = 10059;
