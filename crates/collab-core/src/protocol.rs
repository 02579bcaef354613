//! Wire contract for the Framed RPC Multiplexer (spec §4.1): the nine
//! stable frame kinds, their per-kind validation rules, and the `Frame`
//! envelope every multiplexer implementation exchanges over its duplex
//! transport.
//!
//! The frame/message split here is grounded in the teacher's
//! `protocol.rs` (`Message`/`Frame` over a `RequestId`), generalised from
//! a raw byte-stream framing layer to an already-structured
//! `serde_json::Value` body, since this multiplexer frames logical
//! request/reply/event/stream units rather than arbitrary byte segments.

use crate::error::CoreError;
use crate::ids::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The nine stable frame kinds (spec §4.1). Numeric tags are part of the
/// wire contract and must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    Event = 0,
    Request = 1,
    ReplyValue = 2,
    ReplyError = 3,
    ReplyStream = 4,
    StreamInputData = 5,
    StreamInputEnd = 6,
    StreamOutputData = 7,
    StreamOutputEnd = 8,
}

/// One multiplexer frame. `name` and `data` are validated per kind by
/// [`Frame::validate`] before being handed to application code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub service: String,
    pub id: u64,
    pub name: Option<String>,
    pub data: Option<Value>,
}

impl Frame {
    pub fn request_id(&self) -> RequestId {
        RequestId(self.id)
    }

    /// Reproduces spec §4.1's per-kind validation table exactly. A frame
    /// failing validation is fatal to the connection: the caller must
    /// reply `InvalidEntity` (if a request id can be associated) and then
    /// disconnect.
    pub fn validate(&self) -> Result<(), CoreError> {
        use FrameKind::*;
        match self.kind {
            Event => {
                if self.name.is_none() {
                    return Err(invalid("Frame", "name", "EVENT requires a name"));
                }
            }
            Request => {
                if self.name.is_none() {
                    return Err(invalid("Frame", "name", "REQUEST requires a name"));
                }
                match &self.data {
                    Some(Value::Array(_)) => {}
                    _ => return Err(invalid("Frame", "data", "REQUEST data must be an array")),
                }
            }
            ReplyValue => {
                if self.name.is_some() {
                    return Err(invalid("Frame", "name", "REPLY_VALUE must not carry a name"));
                }
            }
            ReplyError => {
                match &self.data {
                    Some(Value::Object(_)) => {}
                    _ => {
                        return Err(invalid(
                            "Frame",
                            "data",
                            "REPLY_ERROR data must be a non-null, non-array error object",
                        ));
                    }
                }
            }
            ReplyStream => {
                if self.data.is_some() {
                    return Err(invalid("Frame", "data", "REPLY_STREAM data must be absent"));
                }
            }
            StreamInputData | StreamInputEnd | StreamOutputData | StreamOutputEnd => {
                if matches!(self.data, None | Some(Value::Null)) {
                    return Err(invalid("Frame", "data", "STREAM_* data must not be null"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(entity_name: &'static str, field: &str, reason: &str) -> CoreError {
    CoreError::invalid_entity_with(
        entity_name,
        field.to_owned(),
        serde_json::json!({ "reason": reason }),
    )
}

/// A structured error object carried in a `REPLY_ERROR` frame's `data`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&CoreError> for WireError {
    fn from(err: &CoreError) -> Self {
        let kind = match err {
            CoreError::InvalidEntity { .. } => "InvalidEntity",
            CoreError::AlreadyExists { .. } => "AlreadyExists",
            CoreError::NotFound { .. } => "NotFound",
            CoreError::EntityTooLarge { .. } => "EntityTooLarge",
            CoreError::TypeError { .. } => "TypeError",
            CoreError::Auth { .. } => "Auth",
            CoreError::Disconnected => "Disconnected",
            CoreError::Assert { .. } => "Assert",
            CoreError::Store(_) => "Store",
        };
        WireError {
            kind: kind.to_owned(),
            message: err.to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: FrameKind, name: Option<&str>, data: Option<Value>) -> Frame {
        Frame {
            kind,
            service: "content".into(),
            id: 1,
            name: name.map(str::to_owned),
            data,
        }
    }

    #[test]
    fn event_requires_name() {
        assert!(frame(FrameKind::Event, None, None).validate().is_err());
        assert!(frame(FrameKind::Event, Some("active"), None).validate().is_ok());
    }

    #[test]
    fn request_requires_name_and_array_data() {
        assert!(frame(FrameKind::Request, Some("submitOperation"), Some(serde_json::json!([1])))
            .validate()
            .is_ok());
        assert!(frame(FrameKind::Request, Some("submitOperation"), Some(serde_json::json!({})))
            .validate()
            .is_err());
        assert!(frame(FrameKind::Request, None, Some(serde_json::json!([1])))
            .validate()
            .is_err());
    }

    #[test]
    fn reply_value_rejects_name() {
        assert!(frame(FrameKind::ReplyValue, None, Some(serde_json::json!(42)))
            .validate()
            .is_ok());
        assert!(frame(FrameKind::ReplyValue, Some("x"), None).validate().is_err());
    }

    #[test]
    fn reply_error_requires_object_data() {
        assert!(frame(FrameKind::ReplyError, None, Some(serde_json::json!({"kind": "NotFound"})))
            .validate()
            .is_ok());
        assert!(frame(FrameKind::ReplyError, None, Some(serde_json::json!([1])))
            .validate()
            .is_err());
        assert!(frame(FrameKind::ReplyError, None, None).validate().is_err());
    }

    #[test]
    fn reply_stream_rejects_data() {
        assert!(frame(FrameKind::ReplyStream, None, None).validate().is_ok());
        assert!(frame(FrameKind::ReplyStream, None, Some(serde_json::json!(1)))
            .validate()
            .is_err());
    }

    #[test]
    fn stream_frames_reject_null_payload() {
        assert!(frame(FrameKind::StreamOutputData, None, Some(serde_json::json!(1)))
            .validate()
            .is_ok());
        assert!(frame(FrameKind::StreamInputData, None, Some(serde_json::json!(1)))
            .validate()
            .is_ok());
        assert!(frame(FrameKind::StreamOutputData, None, None).validate().is_err());
        assert!(frame(FrameKind::StreamInputData, None, None).validate().is_err());
        assert!(frame(FrameKind::StreamOutputEnd, None, None).validate().is_err());
        assert!(frame(FrameKind::StreamInputEnd, None, None).validate().is_err());
        assert!(frame(FrameKind::StreamOutputEnd, None, Some(serde_json::json!(1)))
            .validate()
            .is_ok());
    }
}
