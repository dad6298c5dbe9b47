//! Execution context handed to tool handlers

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::definition::{AgentDefinition, InvocationOptions};
use crate::agent::invocation::AgentInvocation;
use crate::error::{OrchestratorError, Result};

/// Interactive confirmation callback
#[async_trait]
pub trait ConfirmHandler: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Approves every confirmation request (autonomous mode)
pub struct AutoApprove;

#[async_trait]
impl ConfirmHandler for AutoApprove {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Denies every confirmation request
pub struct AutoDeny;

#[async_trait]
impl ConfirmHandler for AutoDeny {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }
}

/// Context for tool execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    /// Process environment snapshot plus configured overrides
    pub env: Arc<HashMap<String, String>>,
    /// Id of the call being executed
    pub tool_call_id: Option<String>,
    confirm: Arc<dyn ConfirmHandler>,
    invocation: Option<Arc<AgentInvocation>>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: Arc::new(std::env::vars().collect()),
            tool_call_id: None,
            confirm: Arc::new(AutoApprove),
            invocation: None,
        }
    }
}

impl ToolContext {
    pub fn new(
        working_dir: PathBuf,
        env: Arc<HashMap<String, String>>,
        confirm: Arc<dyn ConfirmHandler>,
    ) -> Self {
        Self {
            working_dir,
            env,
            tool_call_id: None,
            confirm,
            invocation: None,
        }
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }

    /// Bind the invocation that owns this call so handlers can spawn children
    pub fn with_invocation(mut self, invocation: Arc<AgentInvocation>) -> Self {
        self.invocation = Some(invocation);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmHandler>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Ask the user to confirm an action
    pub async fn confirm(&self, message: &str) -> bool {
        self.confirm.confirm(message).await
    }

    /// Invocation executing this call, if bound
    pub fn invocation(&self) -> Option<&Arc<AgentInvocation>> {
        self.invocation.as_ref()
    }

    /// Spawn a child invocation under the calling agent and drive it to completion
    pub async fn spawn(
        &self,
        definition: AgentDefinition,
        options: InvocationOptions,
    ) -> Result<Arc<AgentInvocation>> {
        let Some(parent) = &self.invocation else {
            return Err(OrchestratorError::Spawn {
                agent: definition.id,
                reason: "tool context is not bound to an invocation".to_string(),
            });
        };
        parent.spawn(definition, options).await
    }
}
