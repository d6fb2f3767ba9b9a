//! Consumer config diffing, field-by-field, with a "don't check if
//! unset/zero" rule per field class. `server` is the config the server
//! reports is already in effect; `user` is what the caller asked for when
//! subscribing/binding.

use crate::error::{Error, ErrorKind, Result};
use crate::jetstream::types::ConsumerConfig;

fn string_differs(user: &Option<String>, server: &Option<String>) -> bool {
    match user {
        None => false,
        Some(u) if u.is_empty() => false,
        Some(u) => server.as_deref().map_or(true, |s| s != u),
    }
}

fn mismatch(field: &str, user: impl std::fmt::Display, server: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::InvalidArgument,
        format!("configuration requests {} to be '{}', but consumer's value is '{}'", field, user, server),
    )
}

/// Compares `user` against `server`; `Ok(())` iff every field the user cares
/// about (non-empty string, set enum, positive numeric, or `flow_control`)
/// matches the server's value. Idempotent: `check(c, c)` is always `Ok` for
/// any `c` with no "unset" fields.
pub fn check(server: &ConsumerConfig, user: &ConsumerConfig) -> Result<()> {
    if string_differs(&user.durable_name, &server.durable_name) {
        return Err(mismatch("durable", user.durable_name.as_deref().unwrap_or(""), server.durable_name.as_deref().unwrap_or("")));
    }
    if string_differs(&user.description, &server.description) {
        return Err(mismatch("description", user.description.as_deref().unwrap_or(""), server.description.as_deref().unwrap_or("")));
    }
    if user.deliver_policy != crate::jetstream::types::DeliverPolicy::Unset && user.deliver_policy != server.deliver_policy {
        return Err(mismatch("deliver policy", format!("{:?}", user.deliver_policy), format!("{:?}", server.deliver_policy)));
    }
    if user.opt_start_seq.unwrap_or(0) > 0 && user.opt_start_seq != server.opt_start_seq {
        return Err(mismatch(
            "optional start sequence",
            user.opt_start_seq.unwrap_or(0),
            server.opt_start_seq.unwrap_or(0),
        ));
    }
    if user.opt_start_time.unwrap_or(0) > 0 && user.opt_start_time != server.opt_start_time {
        return Err(mismatch(
            "optional start time",
            user.opt_start_time.unwrap_or(0),
            server.opt_start_time.unwrap_or(0),
        ));
    }
    if user.ack_policy != crate::jetstream::types::AckPolicy::Unset && user.ack_policy != server.ack_policy {
        return Err(mismatch("ack policy", format!("{:?}", user.ack_policy), format!("{:?}", server.ack_policy)));
    }
    if user.ack_wait.unwrap_or(0) > 0 && user.ack_wait != server.ack_wait {
        return Err(mismatch("ack wait", user.ack_wait.unwrap_or(0), server.ack_wait.unwrap_or(0)));
    }
    if user.max_deliver.unwrap_or(0) > 0 && user.max_deliver != server.max_deliver {
        return Err(mismatch("max deliver", user.max_deliver.unwrap_or(0), server.max_deliver.unwrap_or(0)));
    }
    if user.replay_policy != crate::jetstream::types::ReplayPolicy::Unset && user.replay_policy != server.replay_policy {
        return Err(mismatch("replay policy", format!("{:?}", user.replay_policy), format!("{:?}", server.replay_policy)));
    }
    if user.rate_limit.unwrap_or(0) > 0 && user.rate_limit != server.rate_limit {
        return Err(mismatch("rate limit", user.rate_limit.unwrap_or(0), server.rate_limit.unwrap_or(0)));
    }
    if string_differs(&user.sample_frequency, &server.sample_frequency) {
        return Err(mismatch(
            "sample frequency",
            user.sample_frequency.as_deref().unwrap_or(""),
            server.sample_frequency.as_deref().unwrap_or(""),
        ));
    }
    if user.max_waiting.unwrap_or(0) > 0 && user.max_waiting != server.max_waiting {
        return Err(mismatch("max waiting", user.max_waiting.unwrap_or(0), server.max_waiting.unwrap_or(0)));
    }
    if user.max_ack_pending.unwrap_or(0) > 0 && user.max_ack_pending != server.max_ack_pending {
        return Err(mismatch("max ack pending", user.max_ack_pending.unwrap_or(0), server.max_ack_pending.unwrap_or(0)));
    }
    // Enabling flow control client-side when the server lacks it is an
    // error; disabling is fine because the library handles FC transparently
    // whenever the server offers it.
    if user.flow_control && !server.flow_control {
        return Err(mismatch("flow control", "true", "false"));
    }
    if user.heartbeat.unwrap_or(0) > 0 && user.heartbeat != server.heartbeat {
        return Err(mismatch("heartbeat", user.heartbeat.unwrap_or(0), server.heartbeat.unwrap_or(0)));
    }

    Ok(())
}
