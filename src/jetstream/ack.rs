//! `Ack`/`Nak`/`InProgress`/`Term`/`AckSync`, and the user-facing
//! delivered-message wrapper that binds a raw transport message to the
//! context it arrived through.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::Message;
use crate::error::{Error, ErrorKind, Result};
use crate::jetstream::context::Context;
use crate::jetstream::metadata::{self, Fields, MsgMetadata};

const JS_ACK_ACK: &[u8] = b"+ACK";
const JS_ACK_NAK: &[u8] = b"-NAK";
const JS_ACK_IN_PROGRESS: &[u8] = b"+WPI";
const JS_ACK_TERM: &[u8] = b"+TERM";
const JS_ACK_PREFIX: &str = "$JS.ACK.";

/// A message delivered from a stream consumer. Wraps the raw transport
/// message with the ack-reply plumbing; `Ack`/`Nak`/`InProgress`/`Term` are
/// no-ops once the message has already been acked (`Ack`/`Nak`/`Term`/
/// `AckSync` all count as "acked" -- `InProgress` never does, since it only
/// extends the consumer's redelivery window).
pub struct JsMessage {
    pub msg: Message,
    ctx: Context,
    acked: AtomicBool,
}

impl JsMessage {
    pub fn new(msg: Message, ctx: Context) -> Self {
        JsMessage {
            msg,
            ctx,
            acked: AtomicBool::new(false),
        }
    }

    pub fn subject(&self) -> &str {
        &self.msg.subject
    }

    pub fn data(&self) -> &[u8] {
        &self.msg.data
    }

    fn ack_reply(&self) -> Result<&str> {
        self.msg
            .reply
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::new(ErrorKind::IllegalState, "not a JetStream message: no reply subject"))
    }

    fn publish_ack(&self, payload: &'static [u8], marks_acked: bool) -> Result<()> {
        if marks_acked && self.acked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let reply = self.ack_reply()?;
        self.ctx.connection().publish(Message::new(reply, payload.to_vec()))
    }

    pub fn ack(&self) -> Result<()> {
        self.publish_ack(JS_ACK_ACK, true)
    }

    pub fn nak(&self) -> Result<()> {
        self.publish_ack(JS_ACK_NAK, true)
    }

    /// Extends the consumer's redelivery window without acking the message.
    pub fn in_progress(&self) -> Result<()> {
        self.publish_ack(JS_ACK_IN_PROGRESS, false)
    }

    pub fn term(&self) -> Result<()> {
        self.publish_ack(JS_ACK_TERM, true)
    }

    /// Acks and waits for the server's confirmation, using the context's
    /// configured request timeout.
    pub fn ack_sync(&self) -> Result<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let reply = self.ack_reply()?;
        self.ctx.connection().request(reply, None, JS_ACK_ACK, self.ctx.wait())?;
        Ok(())
    }

    /// Parses this message's ack-reply subject for its full metadata.
    pub fn meta_data(&self) -> Result<MsgMetadata> {
        let reply = self.ack_reply()?;
        let tail = reply.strip_prefix(JS_ACK_PREFIX).unwrap_or(reply);
        metadata::parse(tail, Fields::All)
    }
}
