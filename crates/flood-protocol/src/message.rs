//! Wire envelope and message parameters
//!
//! Every frame is one JSON envelope:
//!
//! ```text
//! {"error": null | {"key": <string>, "description": <string>},
//!  "data":  null | {"key": <kind>, "vv": <clock>, "param": <kind-specific>}}
//! ```

use crate::error::{ProtocolError, ProtocolResult};
use flood_core::{CausalClock, Payload, SiteId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Kinds of protocol messages, with their wire values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageKind {
    JoinRequest = 0,
    JoinResponse = 1,
    Data = 2,
    Disconnect = 3,
    Ready = 4,
    AckReady = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> ProtocolResult<Self> {
        match value {
            0 => Ok(MessageKind::JoinRequest),
            1 => Ok(MessageKind::JoinResponse),
            2 => Ok(MessageKind::Data),
            3 => Ok(MessageKind::Disconnect),
            4 => Ok(MessageKind::Ready),
            5 => Ok(MessageKind::AckReady),
            other => Err(ProtocolError::UnknownMessageKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

/// Error half of an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub key: String,
    pub description: String,
}

/// Data half of an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub key: MessageKind,
    /// Sender's clock at send time
    pub vv: CausalClock,
    #[serde(default)]
    pub param: serde_json::Value,
}

impl DataRecord {
    /// Decode the kind-specific parameters
    pub fn param<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        T::deserialize(&self.param)
            .map_err(|e| ProtocolError::InvalidParam(format!("{:?}: {}", self.key, e)))
    }
}

/// A decoded envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Error(ErrorRecord),
    Data(DataRecord),
}

/// Wire envelope, exactly one half populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub error: Option<ErrorRecord>,
    pub data: Option<DataRecord>,
}

impl Envelope {
    /// Build a data envelope
    pub fn data<P: Serialize>(key: MessageKind, vv: CausalClock, param: &P) -> ProtocolResult<Self> {
        let param = serde_json::to_value(param)
            .map_err(|e| ProtocolError::InvalidParam(e.to_string()))?;

        Ok(Self {
            error: None,
            data: Some(DataRecord { key, vv, param }),
        })
    }

    /// Build an error envelope
    pub fn error(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorRecord {
                key: key.into(),
                description: description.into(),
            }),
            data: None,
        }
    }

    /// Serialize to a single-line JSON frame
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    /// Parse a raw frame into a message
    pub fn decode(raw: &str) -> ProtocolResult<Message> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        envelope.into_message()
    }

    pub fn into_message(self) -> ProtocolResult<Message> {
        match (self.error, self.data) {
            (Some(error), None) => Ok(Message::Error(error)),
            (None, Some(data)) => Ok(Message::Data(data)),
            (Some(_), Some(_)) => Err(ProtocolError::InvalidEnvelope(
                "both error and data are set".into(),
            )),
            (None, None) => Err(ProtocolError::InvalidEnvelope(
                "neither error nor data is set".into(),
            )),
        }
    }
}

/// Parameters of JoinRequest, Ready and AckReady
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasParam {
    pub alias: String,
}

/// Parameters of JoinResponse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponseParam {
    pub title: String,
    pub alias: String,
    /// Full document snapshot
    pub doc: Payload,
    /// Responder's clock when the snapshot was taken
    pub vv: CausalClock,
    /// Other peers the joiner must connect to
    pub participants: Vec<SiteId>,
}

pub const INSERTION: &str = "insertion";
pub const DELETION: &str = "deletion";

/// Parameters of Data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataParam {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Payload,
}

impl DataParam {
    pub fn insertion(data: Payload) -> Self {
        Self {
            kind: INSERTION.into(),
            data,
        }
    }

    pub fn deletion(data: Payload) -> Self {
        Self {
            kind: DELETION.into(),
            data,
        }
    }

    /// Classify the payload, rejecting unknown operation types
    pub fn into_operation(self) -> ProtocolResult<Operation> {
        match self.kind.as_str() {
            INSERTION => Ok(Operation::Insertion(self.data)),
            DELETION => Ok(Operation::Deletion(self.data)),
            _ => Err(ProtocolError::MalformedPayload(self.kind)),
        }
    }
}

/// A document operation carried by a Data message
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insertion(Payload),
    Deletion(Payload),
}
