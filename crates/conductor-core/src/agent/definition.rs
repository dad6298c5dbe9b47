//! Agent definitions and per-invocation options

use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Map, Value};

use super::context::PackedContext;
use crate::error::{OrchestratorError, Result};
use crate::provider::Message;
use crate::tools::ToolDefinition;

/// Static description of an agent
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: String,
    /// System prompt, rendered as a template when it contains `{{` or `{%`
    pub system_prompt: String,
    /// Default template variables
    pub variables: Map<String, Value>,
    pub context: Option<PackedContext>,
    pub tools: Vec<ToolDefinition>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system_prompt: system_prompt.into(),
            variables: Map::new(),
            context: None,
            tools: Vec::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: PackedContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Render the system prompt with definition variables overlaid by `overrides`
    pub fn render_system_prompt(&self, overrides: &Map<String, Value>) -> Result<String> {
        if !is_template(&self.system_prompt) {
            return Ok(self.system_prompt.clone());
        }

        let mut vars = self.variables.clone();
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.render_str(&self.system_prompt, Value::Object(vars))
            .map_err(|e| OrchestratorError::Template {
                agent: self.id.clone(),
                message: e.to_string(),
            })
    }
}

fn is_template(source: &str) -> bool {
    source.contains("{{") || source.contains("{%")
}

/// Per-invocation inputs
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// User prompt appended after history; empty means none
    pub prompt: String,
    /// Template variables overriding the definition's
    pub variables: Map<String, Value>,
    /// Replaces the definition's context when set
    pub context: Option<PackedContext>,
    /// Prior transcript inserted before the prompt
    pub history: Vec<Message>,
}

impl InvocationOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: PackedContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}
