//! Message model: raw frames on the wire and payloads inside the pipeline.

use bytes::Bytes;
use serde_json::Value;

/// A data message as read from or written to a connection.
///
/// Control frames never surface here: adapters answer pings and swallow
/// pongs, and a close frame is reported as
/// [`ConnectionError::Closed`](crate::error::ConnectionError::Closed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Frame {
    /// Length of the message body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the message body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

/// Intermediate value flowing through the pipeline stages.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Text payload, written as a text frame.
    Text(String),
    /// Binary payload, written as a binary frame.
    Binary(Bytes),
    /// Structured payload, serialized to a JSON text frame when written.
    Json(Value),
}

impl Payload {
    /// Serialize into the frame written to a connection.
    pub fn into_frame(self) -> Result<Frame, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(Frame::Text(text)),
            Self::Binary(data) => Ok(Frame::Binary(data)),
            Self::Json(value) => serde_json::to_string(&value).map(Frame::Text),
        }
    }

    /// Text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// JSON content, if this is a structured payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Frame> for Payload {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text),
            Frame::Binary(data) => Self::Binary(data),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Routing tag produced by the client-side handle stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageType {
    /// Forward to the target.
    #[default]
    Normal,
    /// Answer the client directly; nothing reaches the target.
    Ping,
}
