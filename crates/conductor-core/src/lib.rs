//! Conductor core: provider-agnostic agent orchestration
//!
//! An [`AgentOrchestrator`] drives agents through a streaming model loop,
//! executes schema-validated tools, lets [`hooks`] observe or veto each
//! step, and records every invocation (sub-agents included) as a tree.

pub mod agent;
pub mod error;
pub mod hooks;
pub mod provider;
pub mod tools;
pub mod trace;

pub use agent::{
    collect_invocations, AgentDefinition, AgentInvocation, AgentOrchestrator, InvocationOptions,
    InvocationState, LoopEvent, OrchestratorConfig, OrchestratorServices,
};
pub use error::{OrchestratorError, Result, ToolError};
pub use hooks::{HookBus, HookEvent, HookModule, HookResponse};
pub use provider::{Provider, ScriptedProvider, StreamEvent};
pub use tools::{ToolContext, ToolDefinition, ToolRegistry, ToolResult};
