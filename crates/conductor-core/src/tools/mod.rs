//! Tool system: definitions, validated registry and result envelopes

pub mod context;
pub mod delegate;
pub mod registry;
pub mod result;

pub use context::{AutoApprove, AutoDeny, ConfirmHandler, ToolContext};
pub use delegate::{delegate_tool, DELEGATE_RESULT_SCHEMA, DELEGATE_TOOL_NAME};
pub use registry::{coerce_arguments, ToolDefinition, ToolHandler, ToolRegistry};
pub use result::{ToolResult, TEXT_RESULT_SCHEMA};
