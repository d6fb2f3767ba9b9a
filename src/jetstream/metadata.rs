//! Ack-reply subject parser.
//!
//! The subject has already had its `$JS.ACK.` prefix stripped by the
//! caller; what's left is 7 tokens (v1) or 9-10 tokens (v2, of which only 9
//! carry meaning).

use memchr::memchr;

use crate::error::{Error, ErrorKind, Result};

/// Parsed ack-reply metadata. `domain` is `None` both when the subject omits
/// it (v1) and when the server sends the `"_"` placeholder (v2, no domain
/// configured).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsgMetadata {
    pub domain: Option<String>,
    pub stream: String,
    pub consumer: String,
    pub num_delivered: u64,
    pub stream_seq: u64,
    pub consumer_seq: u64,
    pub timestamp: i64,
    pub num_pending: u64,
}

/// How many leading fields the caller actually needs; parsing stops as soon
/// as that many have been filled, so an invalid tail is ignored when it
/// wasn't asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fields {
    /// Only `stream_seq` and `consumer_seq` (used by sequence-mismatch
    /// tracking).
    Sequences,
    /// Every field.
    All,
}

fn split_tokens(reply: &str) -> Vec<&str> {
    let mut tokens = Vec::with_capacity(9);
    let mut rest = reply;
    while tokens.len() < 9 {
        match memchr(b'.', rest.as_bytes()) {
            Some(idx) => {
                tokens.push(&rest[..idx]);
                rest = &rest[idx + 1..];
            }
            None => {
                tokens.push(rest);
                break;
            }
        }
    }
    tokens
}

fn parse_non_negative(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<i64>().ok()
}

/// Parses an ack-reply subject (with the `$JS.ACK.` prefix already removed)
/// into its metadata fields. `fields` bounds how much of the tail is
/// required to be well-formed.
pub fn parse(reply: &str, fields: Fields) -> Result<MsgMetadata> {
    let mut tokens = split_tokens(reply);

    // v1 is 7 tokens; v2 is 9 (or 10, but we cap collection at 9). Anything
    // else is malformed.
    if tokens.len() < 7 || (tokens.len() > 7 && tokens.len() < 9) {
        return Err(Error::new(ErrorKind::ServerError, format!("invalid ack metadata subject: '{}'", reply)));
    }

    if tokens.len() == 7 {
        let mut promoted = Vec::with_capacity(9);
        promoted.push("");
        promoted.push("");
        promoted.extend(tokens);
        tokens = promoted;
    }

    let mut meta = MsgMetadata::default();
    // The last token index that must be parsed for `fields` to be fully
    // populated. Account hash (i=1) carries no output field, so it must not
    // count toward how far we need to walk.
    let last_index_needed = match fields {
        Fields::Sequences => 6, // consumer_seq
        Fields::All => 8,       // num_pending
    };

    for (i, tok) in tokens.iter().enumerate().take(9) {
        if i > 3 {
            let val = parse_non_negative(tok)
                .ok_or_else(|| Error::new(ErrorKind::ServerError, format!("invalid ack metadata subject: '{}'", reply)))?;
            match i {
                4 => meta.num_delivered = val as u64,
                5 => meta.stream_seq = val as u64,
                6 => meta.consumer_seq = val as u64,
                7 => meta.timestamp = val,
                8 => meta.num_pending = val as u64,
                _ => {}
            }
        } else {
            match i {
                0 => meta.domain = if tok.is_empty() || *tok == "_" { None } else { Some((*tok).to_string()) },
                1 => { /* account hash, ignored */ }
                2 => meta.stream = (*tok).to_string(),
                3 => meta.consumer = (*tok).to_string(),
                _ => {}
            }
        }
        if i == last_index_needed {
            break;
        }
    }

    Ok(meta)
}
