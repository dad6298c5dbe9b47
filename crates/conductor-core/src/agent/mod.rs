//! Agent system
//!
//! ## Orchestrator
//! - `AgentOrchestrator` - The model/tool loop, sub-agent spawning, tracing
//! - `LoopEvent` - Event protocol between orchestrator and consumers
//! - `OrchestratorConfig` / `OrchestratorServices` - Configuration and dependencies
//!
//! ## Invocations
//! - `AgentDefinition` / `InvocationOptions` - What to run and with which inputs
//! - `AgentInvocation` - One run; nodes of the invocation tree
//!
//! ## Transcript
//! - `ContextPacker` - Bounded bundle of workspace files
//! - `TranscriptCompactor` / `WindowCompactor` - Shrinks long transcripts

pub mod compaction;
pub mod context;
pub mod definition;
pub mod invocation;
pub mod loop_events;
pub mod orchestrator;
pub mod runtime;
mod stream;

pub use compaction::{CompactionOutcome, CompactionPlan, TranscriptCompactor, WindowCompactor};
pub use context::{ContextPacker, PackedContext, PackedFile};
pub use definition::{AgentDefinition, InvocationOptions};
pub use invocation::{collect_invocations, AgentInvocation, InvocationState, SpawnHandler};
pub use loop_events::LoopEvent;
pub use orchestrator::AgentOrchestrator;
pub use runtime::{OrchestratorConfig, OrchestratorServices, Runtime};
