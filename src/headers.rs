//! Message headers.
//!
//! Kept deliberately small: an ordered multimap would be more faithful to
//! the wire format, but nothing in this core needs multi-valued headers, and
//! the publish-header / delivery-header names used here are all single-valued
//! in practice.

use std::collections::BTreeMap;
use std::fmt;

pub const NATS_MSG_ID: &str = "Nats-Msg-Id";
pub const NATS_EXPECTED_LAST_MSG_ID: &str = "Nats-Expected-Last-Msg-Id";
pub const NATS_EXPECTED_STREAM: &str = "Nats-Expected-Stream";
pub const NATS_EXPECTED_LAST_SEQUENCE: &str = "Nats-Expected-Last-Sequence";
pub const NATS_EXPECTED_LAST_SUBJECT_SEQUENCE: &str = "Nats-Expected-Last-Subject-Sequence";
pub const NATS_LAST_CONSUMER: &str = "Nats-Last-Consumer";
pub const STATUS: &str = "Status";
pub const DESCRIPTION: &str = "Description";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.entries {
            writeln!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}
