//! Lifecycle hooks
//!
//! Listeners observe and steer a run through a [`HookBus`]. A `preToolUse`
//! listener can veto a tool call; other events are observational.
//!
//! ## Built-in Hooks
//! - `ToolPolicyHook` - Deny-list for tool calls
//! - `LoggingHook` - Structured logging of lifecycle events
//! - `CommandHook` - Runs a shell command per event

pub mod builtin;
pub mod bus;
pub mod command;
pub mod events;
pub mod module;

pub use builtin::{LoggingHook, ToolPolicyHook};
pub use bus::{BlockSignal, HookBus, HookDispatch, HookListener, HookResponse, ListenerFailure};
pub use command::{CommandHook, CommandHookConfig};
pub use events::{AgentMetadata, HookData, HookEvent, HookPayload, SerializedError};
pub use module::HookModule;
