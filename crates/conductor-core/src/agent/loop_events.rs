//! Event protocol for observers of a run.
//!
//! `LoopEvent` mirrors what the orchestrator does as it does it. Consumers
//! (the CLI, a UI) subscribe through an unbounded channel and map these to
//! their own presentation format. Sending never blocks the loop and a
//! dropped receiver is ignored.

use serde::Serialize;
use serde_json::Value;

use crate::provider::Usage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    // ── Lifecycle ──────────────────────────────────────────────────────
    AgentStarted {
        agent: String,
        depth: usize,
    },

    AgentFinished {
        agent: String,
        failed: bool,
        iterations: usize,
    },

    // ── Streaming ──────────────────────────────────────────────────────
    TextDelta {
        agent: String,
        delta: String,
    },

    /// One assistant turn finished
    TurnComplete {
        agent: String,
        iteration: usize,
        reason: Option<String>,
        usage: Option<Usage>,
    },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    ToolCall {
        agent: String,
        id: String,
        name: String,
        arguments: Value,
    },

    ToolBlocked {
        agent: String,
        id: String,
        name: String,
        reason: String,
    },

    ToolResult {
        agent: String,
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },

    /// Tool executed on the provider's side; informational only
    ProviderToolResult {
        agent: String,
        name: String,
        result: Value,
    },

    // ── Out of band ────────────────────────────────────────────────────
    Notification {
        agent: String,
        payload: Value,
    },

    Compacted {
        agent: String,
        removed: usize,
        remaining: usize,
    },

    Error {
        agent: String,
        error: String,
    },
}

impl LoopEvent {
    /// Agent the event belongs to
    pub fn agent(&self) -> &str {
        match self {
            LoopEvent::AgentStarted { agent, .. }
            | LoopEvent::AgentFinished { agent, .. }
            | LoopEvent::TextDelta { agent, .. }
            | LoopEvent::TurnComplete { agent, .. }
            | LoopEvent::ToolCall { agent, .. }
            | LoopEvent::ToolBlocked { agent, .. }
            | LoopEvent::ToolResult { agent, .. }
            | LoopEvent::ProviderToolResult { agent, .. }
            | LoopEvent::Notification { agent, .. }
            | LoopEvent::Compacted { agent, .. }
            | LoopEvent::Error { agent, .. } => agent,
        }
    }
}
