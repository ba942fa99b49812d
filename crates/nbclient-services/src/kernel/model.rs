//! Kernel wire models

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Running kernel as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelModel {
    /// Kernel id
    pub id: String,
    /// Kernel spec name
    pub name: String,
}

impl KernelModel {
    /// Create model
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Kernel execution state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    /// Not yet known
    #[default]
    Unknown,
    /// Starting up
    Starting,
    /// Ready for requests
    Idle,
    /// Executing
    Busy,
    /// Shutting down
    Terminating,
    /// Restart requested
    Restarting,
    /// Restarted by the server after dying
    Autorestarting,
    /// Gone for good
    Dead,
}

impl KernelStatus {
    /// Parse an `execution_state` value; unknown states map to `Unknown`
    #[must_use]
    pub fn parse(state: &str) -> Self {
        match state {
            "starting" => Self::Starting,
            "idle" => Self::Idle,
            "busy" => Self::Busy,
            "terminating" => Self::Terminating,
            "restarting" => Self::Restarting,
            "autorestarting" => Self::Autorestarting,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Kernel message channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Request/reply channel
    Shell,
    /// Broadcast channel
    Iopub,
    /// Input requests
    Stdin,
    /// Control requests
    Control,
}

/// Message header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Message id
    pub msg_id: String,
    /// Message type (`status`, `stream`, ...)
    pub msg_type: String,
    /// Client session id
    #[serde(default)]
    pub session: String,
    /// Sender
    #[serde(default)]
    pub username: String,
}

/// Kernel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelMessage {
    /// Header
    pub header: MessageHeader,
    /// Header of the request this replies to
    #[serde(default)]
    pub parent_header: Value,
    /// Channel the message arrived on
    pub channel: Channel,
    /// Payload
    #[serde(default)]
    pub content: Value,
    /// Metadata
    #[serde(default)]
    pub metadata: Value,
}

impl KernelMessage {
    /// Create message with a fresh id
    #[must_use]
    pub fn new(channel: Channel, msg_type: impl Into<String>, content: Value) -> Self {
        Self {
            header: MessageHeader {
                msg_id: uuid::Uuid::new_v4().to_string(),
                msg_type: msg_type.into(),
                session: String::new(),
                username: String::new(),
            },
            parent_header: Value::Object(serde_json::Map::new()),
            channel,
            content,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    /// iopub `status` message
    #[must_use]
    pub fn status(state: KernelStatus) -> Self {
        Self::new(
            Channel::Iopub,
            "status",
            serde_json::json!({ "execution_state": state }),
        )
    }

    /// Execution state carried by a `status` message
    #[must_use]
    pub fn execution_state(&self) -> Option<KernelStatus> {
        if self.header.msg_type != "status" {
            return None;
        }
        self.content
            .get("execution_state")
            .and_then(Value::as_str)
            .map(KernelStatus::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_message_round_trip() {
        let msg = KernelMessage::status(KernelStatus::Busy);
        assert_eq!(msg.execution_state(), Some(KernelStatus::Busy));
        assert_eq!(msg.content, json!({ "execution_state": "busy" }));
    }

    #[test]
    fn non_status_has_no_state() {
        let msg = KernelMessage::new(Channel::Iopub, "stream", json!({ "text": "hi" }));
        assert_eq!(msg.execution_state(), None);
        assert_eq!(KernelStatus::parse("sleepy"), KernelStatus::Unknown);
    }
}
