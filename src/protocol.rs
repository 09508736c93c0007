//! Channel wire format.
//!
//! Frames use the version 2 JSON serializer of the Phoenix channels protocol:
//! each text message is an array `[join_ref, ref, topic, event, payload]`.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version announced in the connection query string.
pub const VSN: &str = "2.0.0";

/// Topic used for connection-level messages such as heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Reserved event names.
pub mod events {
    /// Join a channel.
    pub const JOIN: &str = "phx_join";
    /// Leave a channel.
    pub const LEAVE: &str = "phx_leave";
    /// Reply to a client push.
    pub const REPLY: &str = "phx_reply";
    /// Server-side channel crash.
    pub const ERROR: &str = "phx_error";
    /// Channel closed by the server.
    pub const CLOSE: &str = "phx_close";
    /// Connection heartbeat.
    pub const HEARTBEAT: &str = "heartbeat";
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireFrame", into = "WireFrame")]
pub struct Frame {
    /// Ref of the join that this frame belongs to.
    pub join_ref: Option<String>,
    /// Message ref, echoed in replies.
    pub reference: Option<String>,
    /// Channel topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Value,
}

#[derive(Serialize, Deserialize)]
struct WireFrame(Option<String>, Option<String>, String, String, Value);

impl From<WireFrame> for Frame {
    fn from(WireFrame(join_ref, reference, topic, event, payload): WireFrame) -> Self {
        Self {
            join_ref,
            reference,
            topic,
            event,
            payload,
        }
    }
}

impl From<Frame> for WireFrame {
    fn from(frame: Frame) -> Self {
        Self(
            frame.join_ref,
            frame.reference,
            frame.topic,
            frame.event,
            frame.payload,
        )
    }
}

/// Payload of a `phx_reply` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// "ok" or "error".
    pub status: String,
    /// Reply body.
    #[serde(default)]
    pub response: Value,
}

impl Reply {
    /// Returns true for an `ok` reply.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Converts the reply into the response body, or an error for non-`ok`.
    ///
    /// # Errors
    /// Returns `Error::ChannelReply` when the status is not `ok`.
    pub fn into_result(self) -> Result<Value, Error> {
        if self.is_ok() {
            Ok(self.response)
        } else {
            Err(Error::ChannelReply {
                status: self.status,
                response: self.response,
            })
        }
    }
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(
        join_ref: Option<String>,
        reference: Option<String>,
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            join_ref,
            reference,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    /// Creates a heartbeat frame.
    #[must_use]
    pub fn heartbeat(reference: String) -> Self {
        Self::new(
            None,
            Some(reference),
            PHOENIX_TOPIC,
            events::HEARTBEAT,
            Value::Object(Default::default()),
        )
    }

    /// Encodes the frame as a text message.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a text message.
    ///
    /// # Errors
    /// Returns error if the text is not a valid frame.
    pub fn decode(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the reply payload if this is a `phx_reply` frame.
    #[must_use]
    pub fn reply(&self) -> Option<Reply> {
        if self.event != events::REPLY {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}
