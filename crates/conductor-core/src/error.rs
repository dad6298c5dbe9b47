//! Error types for the orchestration core

use thiserror::Error;

use crate::hooks::HookEvent;

/// Failures raised by the tool registry
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for tool '{tool}':\n{}", format_violations(.violations))]
    Validation {
        tool: String,
        violations: Vec<String>,
    },

    #[error("Tool '{tool}' returned output not matching schema '{schema_id}': {details}")]
    OutputValidation {
        tool: String,
        schema_id: String,
        details: String,
    },

    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    #[error("Invalid tool definition '{tool}': {reason}")]
    InvalidDefinition { tool: String, reason: String },
}

fn format_violations(violations: &[String]) -> String {
    violations
        .iter()
        .map(|v| format!("- {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failures that abort or mark an invocation
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Hook listener for '{event}' failed: {message}")]
    HookDispatch { event: HookEvent, message: String },

    #[error("Provider '{provider}' failed to open stream: {message}")]
    Provider { provider: String, message: String },

    #[error("Provider stream error: {0}")]
    ProviderStream(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Agent '{agent}' exceeded {limit} iterations")]
    IterationLimit { agent: String, limit: usize },

    #[error("Failed to render system prompt for '{agent}': {message}")]
    Template { agent: String, message: String },

    #[error("Cannot spawn from '{agent}': {reason}")]
    Spawn { agent: String, reason: String },
}

impl OrchestratorError {
    /// Short error name used in hook payloads and traces
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorError::HookDispatch { .. } => "HookDispatchFailure",
            OrchestratorError::Provider { .. } => "ProviderError",
            OrchestratorError::ProviderStream(_) => "ProviderStreamError",
            OrchestratorError::Tool(ToolError::UnknownTool(_)) => "UnknownTool",
            OrchestratorError::Tool(ToolError::Validation { .. }) => "ValidationError",
            OrchestratorError::Tool(ToolError::OutputValidation { .. }) => {
                "OutputValidationError"
            }
            OrchestratorError::Tool(ToolError::Execution { .. }) => "ToolExecutionFailure",
            OrchestratorError::Tool(ToolError::InvalidDefinition { .. }) => "InvalidToolDefinition",
            OrchestratorError::IterationLimit { .. } => "IterationLimit",
            OrchestratorError::Template { .. } => "TemplateError",
            OrchestratorError::Spawn { .. } => "SpawnError",
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
