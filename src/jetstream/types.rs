//! Wire types for the administrative API surface and consumer/stream
//! configuration. `DeliverPolicy`/`AckPolicy`/`ReplayPolicy` each carry an
//! explicit `Unset` sentinel since `ConsumerConfig` doubles as both "user
//! intent" (where unset fields mean "don't care") and "server-reported
//! state" (always concrete).

use chrono::{DateTime as ChronoDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::UNIX_EPOCH;

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct DateTime(pub ChronoDateTime<Utc>);

impl Default for DateTime {
    fn default() -> DateTime {
        DateTime(UNIX_EPOCH.into())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    All,
    Last,
    New,
    ByStartSequence,
    ByStartTime,
    /// Sentinel: "don't care / server default / don't verify". Never sent
    /// over the wire -- callers that leave this set must not serialize it
    /// into an AddConsumer request (see `ConsumerConfig::for_create`).
    #[serde(skip)]
    Unset,
}

impl Default for DeliverPolicy {
    fn default() -> Self {
        DeliverPolicy::Unset
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    None,
    All,
    Explicit,
    #[serde(skip)]
    Unset,
}

impl Default for AckPolicy {
    fn default() -> Self {
        AckPolicy::Unset
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    Instant,
    Original,
    #[serde(skip)]
    Unset,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        ReplayPolicy::Unset
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Limits,
    Interest,
    Workqueue,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Limits
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    Old,
    New,
}

impl Default for DiscardPolicy {
    fn default() -> Self {
        DiscardPolicy::Old
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    File,
    Memory,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::File
    }
}

/// Configuration for a consumer. Doubles as user-intent (unset fields mean
/// "don't care", see [`crate::jetstream::config::check`]) and as the
/// server-reported shape returned in [`ConsumerInfo`].
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ConsumerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_subject: Option<String>,
    #[serde(skip_serializing_if = "is_unset_deliver")]
    pub deliver_policy: DeliverPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_start_seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_start_time: Option<i64>,
    #[serde(skip_serializing_if = "is_unset_ack")]
    pub ack_policy: AckPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_wait: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deliver: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_subject: Option<String>,
    #[serde(skip_serializing_if = "is_unset_replay")]
    pub replay_policy: ReplayPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_waiting: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ack_pending: Option<i64>,
    #[serde(skip_serializing_if = "is_false")]
    pub flow_control: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_group: Option<String>,
}

fn is_unset_deliver(p: &DeliverPolicy) -> bool {
    *p == DeliverPolicy::Unset
}
fn is_unset_ack(p: &AckPolicy) -> bool {
    *p == AckPolicy::Unset
}
fn is_unset_replay(p: &ReplayPolicy) -> bool {
    *p == ReplayPolicy::Unset
}
fn is_false(b: &bool) -> bool {
    !*b
}

impl From<&str> for ConsumerConfig {
    fn from(s: &str) -> ConsumerConfig {
        ConsumerConfig {
            durable_name: Some(s.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct CreateConsumerRequest {
    pub stream_name: String,
    pub config: ConsumerConfig,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    pub subjects: Option<Vec<String>>,
    pub name: String,
    pub retention: RetentionPolicy,
    pub max_consumers: i64,
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub discard: DiscardPolicy,
    pub max_age: i64,
    pub max_msg_size: Option<i32>,
    pub storage: StorageType,
    pub num_replicas: usize,
    pub no_ack: Option<bool>,
    pub duplicate_window: Option<i64>,
}

impl From<&str> for StreamConfig {
    fn from(s: &str) -> StreamConfig {
        StreamConfig {
            name: s.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StreamInfo {
    pub r#type: String,
    pub config: StreamConfig,
    pub created: DateTime,
    pub state: StreamState,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StreamState {
    #[serde(default)]
    pub msgs: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct PubAck {
    pub stream: String,
    pub seq: u64,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ConsumerInfo {
    pub r#type: String,
    pub stream_name: String,
    pub name: String,
    pub created: DateTime,
    pub config: ConsumerConfig,
    pub delivered: SequencePair,
    pub ack_floor: SequencePair,
    pub num_ack_pending: usize,
    pub num_redelivered: usize,
    pub num_waiting: usize,
    pub num_pending: u64,
    #[serde(default)]
    pub push_bound: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
pub struct SequencePair {
    pub consumer_seq: u64,
    pub stream_seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
pub struct NextRequest {
    pub batch: usize,
    pub expires: i64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_wait: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StreamRequest {
    pub subject: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StreamNamesResponse {
    #[serde(default)]
    pub streams: Vec<String>,
}

/// Wraps a raw API response so an `"error"` field can be detected before the
/// caller tries to decode the success shape.
#[derive(Debug, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiError {
    pub code: i64,
    #[serde(default)]
    pub err_code: u64,
    pub description: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
pub struct AccountLimits {
    pub max_memory: i64,
    pub max_storage: i64,
    pub max_streams: i64,
    pub max_consumers: i64,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
pub struct ApiStats {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AccountInfo {
    pub memory: i64,
    pub storage: i64,
    pub streams: i64,
    pub consumers: i64,
    pub api: ApiStats,
    pub limits: AccountLimits,
}
