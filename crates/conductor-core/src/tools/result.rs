//! Tool result envelope
//!
//! Every handler answers with `{schema, content, data?, metadata?}`. The
//! `schema` field names the structured payload carried in `data`; tools
//! that declare an output schema must use its `$id` here.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema id used by tools that return plain text
pub const TEXT_RESULT_SCHEMA: &str = "text";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub schema: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn new(schema: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            content: content.into(),
            data: None,
            metadata: None,
        }
    }

    /// Plain-text result for tools without an output schema
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(TEXT_RESULT_SCHEMA, content)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Serialized form appended to the transcript as the tool-role entry
    pub fn to_transcript(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.content.clone())
    }
}

impl From<ToolResult> for Value {
    fn from(result: ToolResult) -> Self {
        serde_json::to_value(&result).unwrap_or_else(|_| {
            json!({
                "schema": result.schema,
                "content": result.content,
            })
        })
    }
}

/// The fixed envelope every handler output is checked against
pub fn envelope_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "schema": { "type": "string" },
            "content": { "type": "string" },
            "data": {},
            "metadata": { "type": "object" }
        },
        "required": ["schema", "content"]
    })
}
