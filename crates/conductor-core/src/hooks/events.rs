//! Lifecycle events and the payloads delivered to listeners

use serde::{Deserialize, Serialize};

use crate::agent::compaction::CompactionPlan;
use crate::error::OrchestratorError;
use crate::provider::{Message, StreamEvent, ToolCall};
use crate::tools::ToolResult;

/// Lifecycle event a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    BeforeAgentStart,
    AfterAgentComplete,
    OnAgentError,
    BeforeModelCall,
    PreCompact,
    PreToolUse,
    PostToolUse,
    Notification,
    OnError,
    Stop,
    SubagentStop,
}

impl HookEvent {
    pub fn all() -> &'static [HookEvent] {
        &[
            HookEvent::BeforeAgentStart,
            HookEvent::AfterAgentComplete,
            HookEvent::OnAgentError,
            HookEvent::BeforeModelCall,
            HookEvent::PreCompact,
            HookEvent::PreToolUse,
            HookEvent::PostToolUse,
            HookEvent::Notification,
            HookEvent::OnError,
            HookEvent::Stop,
            HookEvent::SubagentStop,
        ]
    }

    /// Wire name used in configuration and payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeAgentStart => "beforeAgentStart",
            HookEvent::AfterAgentComplete => "afterAgentComplete",
            HookEvent::OnAgentError => "onAgentError",
            HookEvent::BeforeModelCall => "beforeModelCall",
            HookEvent::PreCompact => "preCompact",
            HookEvent::PreToolUse => "preToolUse",
            HookEvent::PostToolUse => "postToolUse",
            HookEvent::Notification => "notification",
            HookEvent::OnError => "onError",
            HookEvent::Stop => "stop",
            HookEvent::SubagentStop => "subagentStop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|e| e.as_str() == s)
    }

    /// Events whose listener failures abort the invocation.
    /// The rest are advisory and only logged.
    pub fn must_succeed(&self) -> bool {
        !matches!(
            self,
            HookEvent::PreCompact | HookEvent::Notification | HookEvent::SubagentStop
        )
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an invocation taken when a payload is built
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub id: String,
    pub parent_id: Option<String>,
    pub depth: usize,
    pub is_root: bool,
    pub system_prompt: String,
    pub tools: Vec<String>,
}

/// Error rendered for payloads and traces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
}

impl From<&OrchestratorError> for SerializedError {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            name: err.name().to_string(),
            message: err.to_string(),
        }
    }
}

/// Event-specific part of a payload
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HookData {
    AgentStart {
        prompt: String,
    },
    ModelCall {
        iteration: usize,
        messages: Vec<Message>,
    },
    PreCompact {
        iteration: usize,
        plan: CompactionPlan,
    },
    ToolCall {
        iteration: usize,
        call: ToolCall,
        event: StreamEvent,
    },
    ToolResult {
        iteration: usize,
        call: ToolCall,
        result: ToolResult,
    },
    Notification {
        iteration: usize,
        event: StreamEvent,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        iteration: Option<usize>,
        error: SerializedError,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<StreamEvent>,
    },
    Stop {
        iteration: usize,
        event: StreamEvent,
    },
    AgentComplete {
        iterations: usize,
        messages: Vec<Message>,
    },
    SubagentStop {
        failed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Payload handed to every listener of one emission
#[derive(Debug, Clone, Serialize)]
pub struct HookPayload {
    pub event: HookEvent,
    pub agent: AgentMetadata,
    pub data: HookData,
}

impl HookPayload {
    pub fn new(event: HookEvent, agent: AgentMetadata, data: HookData) -> Self {
        Self { event, agent, data }
    }

    /// Tool call carried by `preToolUse` / `postToolUse` payloads
    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.data {
            HookData::ToolCall { call, .. } | HookData::ToolResult { call, .. } => Some(call),
            _ => None,
        }
    }
}
