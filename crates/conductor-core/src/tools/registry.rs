//! Tool registry with JSON Schema validation
//!
//! Input schemas are compiled at registration. Handler output is checked
//! against the fixed result envelope and, when the tool declares one, its
//! output schema keyed by `$id`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use super::context::ToolContext;
use super::result::{envelope_schema, ToolResult};
use crate::error::ToolError;
use crate::provider::{ToolCall, ToolSchema};

static ENVELOPE_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    jsonschema::validator_for(&envelope_schema()).expect("envelope schema compiles")
});

/// Envelope schema id reported when output is not an envelope at all
const ENVELOPE_SCHEMA_ID: &str = "tool-result-envelope";

/// Executes a tool call and returns the raw result envelope
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: ToolContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, args: Value, ctx: ToolContext) -> anyhow::Result<Value> {
        (self)(args, ctx).await
    }
}

/// A tool as declared on an agent definition
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema,
            output_schema: None,
            handler: Arc::new(handler),
        }
    }

    /// Build a tool from an async closure
    pub fn from_fn<F, Fut>(name: impl Into<String>, input_schema: Value, f: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(name, input_schema, f)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare an output schema; it must carry a string `$id`
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

struct OutputContract {
    id: String,
    validator: Validator,
}

struct RegisteredTool {
    definition: ToolDefinition,
    input: Validator,
    output: Option<OutputContract>,
}

/// Per-agent set of validated tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, used when advertising schemas
    order: Vec<String>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ToolDefinition>,
    ) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Register a tool, compiling its schemas
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), ToolError> {
        let name = definition.name.clone();
        if self.tools.contains_key(&name) {
            return Err(ToolError::InvalidDefinition {
                tool: name,
                reason: "a tool with this name is already registered".to_string(),
            });
        }

        let input = jsonschema::validator_for(&definition.input_schema).map_err(|e| {
            ToolError::InvalidDefinition {
                tool: name.clone(),
                reason: format!("input schema does not compile: {e}"),
            }
        })?;

        let output = match &definition.output_schema {
            Some(schema) => Some(compile_output_schema(&name, schema)?),
            None => None,
        };

        tracing::debug!(tool = %name, has_output_schema = output.is_some(), "Registered tool");
        self.order.push(name.clone());
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                input,
                output,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Schemas advertised to the provider, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.schema())
            .collect()
    }

    /// Validate, run and check one tool call
    pub async fn execute(&self, call: &ToolCall, ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let args = coerce_arguments(&call.arguments);
        let violations: Vec<String> = tool.input.iter_errors(&args).map(|e| e.to_string()).collect();
        if !violations.is_empty() {
            tracing::info!(tool = %call.name, count = violations.len(), "Tool arguments rejected");
            return Err(ToolError::Validation {
                tool: call.name.clone(),
                violations,
            });
        }

        let start = Instant::now();
        let raw = tool
            .definition
            .handler
            .call(args, ctx)
            .await
            .map_err(|e| ToolError::Execution {
                tool: call.name.clone(),
                message: format!("{e:#}"),
            })?;
        tracing::debug!(
            tool = %call.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool handler returned"
        );

        check_output(&call.name, tool.output.as_ref(), raw)
    }
}

fn compile_output_schema(tool: &str, schema: &Value) -> Result<OutputContract, ToolError> {
    let id = schema
        .get("$id")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidDefinition {
            tool: tool.to_string(),
            reason: "output schema must declare a string \"$id\"".to_string(),
        })?
        .to_string();

    let validator =
        jsonschema::validator_for(schema).map_err(|e| ToolError::InvalidDefinition {
            tool: tool.to_string(),
            reason: format!("output schema '{id}' does not compile: {e}"),
        })?;

    Ok(OutputContract { id, validator })
}

fn check_output(
    tool: &str,
    contract: Option<&OutputContract>,
    raw: Value,
) -> Result<ToolResult, ToolError> {
    let declared = contract.map_or(ENVELOPE_SCHEMA_ID, |c| c.id.as_str());
    let output_error = |details: String| ToolError::OutputValidation {
        tool: tool.to_string(),
        schema_id: declared.to_string(),
        details,
    };

    let envelope_errors: Vec<String> = ENVELOPE_VALIDATOR
        .iter_errors(&raw)
        .map(|e| e.to_string())
        .collect();
    if !envelope_errors.is_empty() {
        return Err(output_error(format!(
            "result is not a valid envelope: {}",
            envelope_errors.join("; ")
        )));
    }

    let result: ToolResult =
        serde_json::from_value(raw).map_err(|e| output_error(e.to_string()))?;

    let Some(contract) = contract else {
        return Ok(result);
    };

    if result.schema != contract.id {
        return Err(output_error(format!(
            "expected schema '{}', got '{}'",
            contract.id, result.schema
        )));
    }

    let data = result.data.clone().unwrap_or(Value::Null);
    let violations: Vec<String> = contract
        .validator
        .iter_errors(&data)
        .map(|e| e.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(output_error(violations.join("; ")));
    }

    Ok(result)
}

/// Normalize raw model arguments into a JSON value
///
/// Strings are parsed as JSON; unparseable strings become `{"input": raw}`.
/// Missing arguments become an empty object.
pub fn coerce_arguments(raw: &Value) -> Value {
    match raw {
        Value::Null => json!({}),
        Value::String(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| json!({ "input": text }))
        }
        other => other.clone(),
    }
}
