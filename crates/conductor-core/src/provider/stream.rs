//! Stream events produced by provider adapters
//!
//! A provider call yields a lazy, finite, non-restartable sequence of these
//! events. The orchestrator consumes them strictly in emission order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Usage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant text fragment
    Delta { text: String },

    /// The model wants a tool executed
    ToolCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },

    /// Result of a tool the provider ran on its own side
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        result: Value,
    },

    /// The stream itself failed
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<Value>,
    },

    /// Out-of-band provider notification
    Notification {
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// End of the assistant turn
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        StreamEvent::ToolCall {
            id: None,
            name: name.into(),
            arguments,
            raw: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            cause: None,
        }
    }

    pub fn notification(payload: Value) -> Self {
        StreamEvent::Notification {
            payload,
            metadata: None,
        }
    }

    pub fn end() -> Self {
        StreamEvent::End {
            reason: None,
            usage: None,
        }
    }

    /// Wire name of the event (`delta`, `tool_call`, ...)
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Notification { .. } => "notification",
            StreamEvent::End { .. } => "end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_shape() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "tool_call",
            "name": "read",
            "arguments": "{\"path\": \"a.txt\"}"
        }))
        .unwrap();

        match event {
            StreamEvent::ToolCall {
                id,
                name,
                arguments,
                ..
            } => {
                assert!(id.is_none());
                assert_eq!(name, "read");
                assert!(arguments.is_string());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn end_without_fields_parses() {
        let event: StreamEvent = serde_json::from_value(json!({"type": "end"})).unwrap();
        assert_eq!(event, StreamEvent::end());
        assert_eq!(event.kind(), "end");
    }
}
