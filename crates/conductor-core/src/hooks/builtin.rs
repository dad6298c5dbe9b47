//! Built-in listeners
//!
//! - `ToolPolicyHook` - Blocks tool calls by name or argument pattern
//! - `LoggingHook` - Logs every lifecycle event it is attached to

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::bus::{HookListener, HookResponse};
use super::events::{HookData, HookPayload};

struct PolicyRule {
    tool: Regex,
    arguments: Option<Regex>,
    reason: String,
}

/// Deny-list policy for `preToolUse`
#[derive(Default)]
pub struct ToolPolicyHook {
    rules: Vec<PolicyRule>,
}

impl ToolPolicyHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every tool whose name matches `pattern`
    pub fn deny(mut self, pattern: &str, reason: impl Into<String>) -> Result<Self, regex::Error> {
        self.rules.push(PolicyRule {
            tool: Regex::new(pattern)?,
            arguments: None,
            reason: reason.into(),
        });
        Ok(self)
    }

    /// Block calls to matching tools whose serialized arguments match `arguments`
    pub fn deny_arguments(
        mut self,
        tool: &str,
        arguments: &str,
        reason: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        self.rules.push(PolicyRule {
            tool: Regex::new(tool)?,
            arguments: Some(Regex::new(arguments)?),
            reason: reason.into(),
        });
        Ok(self)
    }
}

#[async_trait]
impl HookListener for ToolPolicyHook {
    async fn handle(&self, payload: Arc<HookPayload>) -> anyhow::Result<HookResponse> {
        let Some(call) = payload.tool_call() else {
            return Ok(HookResponse::Continue);
        };
        let arguments = call.arguments.to_string();

        for rule in &self.rules {
            if !rule.tool.is_match(&call.name) {
                continue;
            }
            if rule.arguments.as_ref().is_some_and(|re| !re.is_match(&arguments)) {
                continue;
            }
            tracing::info!(
                agent = %payload.agent.id,
                tool = %call.name,
                reason = %rule.reason,
                "Policy blocked tool call"
            );
            return Ok(HookResponse::block(rule.reason.clone()));
        }
        Ok(HookResponse::Continue)
    }
}

/// Logs lifecycle events with agent context
pub struct LoggingHook;

#[async_trait]
impl HookListener for LoggingHook {
    async fn handle(&self, payload: Arc<HookPayload>) -> anyhow::Result<HookResponse> {
        let agent = &payload.agent;
        match &payload.data {
            HookData::ToolCall { call, .. } => {
                tracing::info!(agent = %agent.id, depth = agent.depth, tool = %call.name, "Tool requested");
            }
            HookData::ToolResult { call, result, .. } => {
                tracing::info!(
                    agent = %agent.id,
                    tool = %call.name,
                    schema = %result.schema,
                    content_len = result.content.len(),
                    "Tool completed"
                );
            }
            HookData::Error { error, .. } => {
                tracing::warn!(agent = %agent.id, error = %error.message, "{}", error.name);
            }
            _ => {
                tracing::debug!(agent = %agent.id, depth = agent.depth, event = %payload.event, "Hook event");
            }
        }
        Ok(HookResponse::Continue)
    }
}
