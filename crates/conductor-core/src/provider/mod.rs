//! Provider abstraction
//!
//! The orchestrator only depends on the streaming contract below. Adapters
//! for concrete vendors parse their own wire formats and map them onto
//! [`StreamEvent`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub mod scripted;
pub mod stream;
pub mod types;

pub use scripted::ScriptedProvider;
pub use stream::StreamEvent;
pub use types::{Message, Role, ToolCall, ToolSchema, Usage};

/// Lazy sequence of stream events for one model call
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Input of one streaming model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
}

/// A model provider capable of streaming a turn
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Open a streaming call. Errors here mean the stream never started;
    /// failures after that arrive as [`StreamEvent::Error`].
    async fn stream(&self, request: ProviderRequest) -> anyhow::Result<EventStream>;
}
