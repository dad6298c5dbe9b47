//! Delegation tool: lets an agent hand a prompt to a named sub-agent

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::context::ToolContext;
use super::registry::{ToolDefinition, ToolHandler};
use super::result::ToolResult;
use crate::agent::definition::{AgentDefinition, InvocationOptions};

pub const DELEGATE_TOOL_NAME: &str = "delegate";
pub const DELEGATE_RESULT_SCHEMA: &str = "conductor.delegate.result";

#[derive(Deserialize)]
struct DelegateParams {
    agent: String,
    prompt: String,
}

struct DelegateHandler {
    agents: HashMap<String, AgentDefinition>,
}

#[async_trait]
impl ToolHandler for DelegateHandler {
    async fn call(&self, args: Value, ctx: ToolContext) -> anyhow::Result<Value> {
        let params: DelegateParams =
            serde_json::from_value(args).context("Invalid parameters")?;
        let definition = self
            .agents
            .get(&params.agent)
            .cloned()
            .ok_or_else(|| anyhow!("no sub-agent named '{}'", params.agent))?;

        tracing::info!(agent = %params.agent, "Delegating to sub-agent");
        let child = ctx
            .spawn(definition, InvocationOptions::new(params.prompt))
            .await?;

        let failed = child.is_failed();
        let output = child.last_assistant_text().unwrap_or_default();
        let content = if failed {
            format!(
                "Sub-agent '{}' failed: {}",
                child.id(),
                child.error().map(|e| e.message).unwrap_or_default()
            )
        } else {
            output.clone()
        };

        Ok(ToolResult::new(DELEGATE_RESULT_SCHEMA, content)
            .with_data(json!({
                "agent": child.id(),
                "failed": failed,
                "output": output,
            }))
            .into())
    }
}

/// Build the `delegate` tool over the given sub-agent definitions
pub fn delegate_tool(agents: impl IntoIterator<Item = AgentDefinition>) -> ToolDefinition {
    let agents: HashMap<String, AgentDefinition> =
        agents.into_iter().map(|a| (a.id.clone(), a)).collect();
    let mut ids: Vec<&str> = agents.keys().map(String::as_str).collect();
    ids.sort_unstable();

    let input_schema = json!({
        "type": "object",
        "properties": {
            "agent": { "type": "string", "enum": ids, "description": "Sub-agent to run" },
            "prompt": { "type": "string", "description": "Task for the sub-agent" }
        },
        "required": ["agent", "prompt"],
        "additionalProperties": false
    });
    let output_schema = json!({
        "$id": DELEGATE_RESULT_SCHEMA,
        "type": "object",
        "properties": {
            "agent": { "type": "string" },
            "failed": { "type": "boolean" },
            "output": { "type": "string" }
        },
        "required": ["agent", "failed", "output"]
    });

    ToolDefinition::new(DELEGATE_TOOL_NAME, input_schema, DelegateHandler { agents })
        .with_description("Run a sub-agent on a prompt and return its final answer")
        .with_output_schema(output_schema)
}
