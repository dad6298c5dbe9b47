//! Event bus dispatching lifecycle payloads to registered listeners
//!
//! Listeners for one emission are awaited one at a time in registration
//! order against the same shared payload. A listener can block, return a
//! value or fail. Only `preToolUse` honors a block. Whether a failure
//! aborts the agent is decided by the caller through
//! [`HookBus::emit_checked`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::events::{HookEvent, HookPayload};
use crate::error::OrchestratorError;

/// What a listener answered
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HookResponse {
    /// Nothing to report
    #[default]
    Continue,
    /// Arbitrary value collected into the dispatch result
    Value(Value),
    /// Deny the pending action
    Block { reason: Option<String> },
}

impl HookResponse {
    pub fn block(reason: impl Into<String>) -> Self {
        HookResponse::Block {
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait HookListener: Send + Sync {
    async fn handle(&self, payload: Arc<HookPayload>) -> anyhow::Result<HookResponse>;
}

#[async_trait]
impl<F, Fut> HookListener for F
where
    F: Fn(Arc<HookPayload>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HookResponse>> + Send,
{
    async fn handle(&self, payload: Arc<HookPayload>) -> anyhow::Result<HookResponse> {
        (self)(payload).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockSignal {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerFailure {
    /// Registration index of the failing listener
    pub index: usize,
    pub message: String,
}

/// Aggregated outcome of one emission
#[derive(Debug, Clone, Default)]
pub struct HookDispatch {
    /// Responses of listeners that succeeded, in registration order
    pub results: Vec<HookResponse>,
    /// First block signal by registration order
    pub blocked: Option<BlockSignal>,
    /// First failure by registration order
    pub error: Option<ListenerFailure>,
}

impl HookDispatch {
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.blocked.as_ref().and_then(|b| b.reason.as_deref())
    }

    /// Values returned through [`HookResponse::Value`]
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.results.iter().filter_map(|r| match r {
            HookResponse::Value(v) => Some(v),
            _ => None,
        })
    }
}

#[derive(Default)]
pub struct HookBus {
    listeners: HashMap<HookEvent, Vec<Arc<dyn HookListener>>>,
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(event, list)| (event.as_str(), list.len()))
            .collect();
        f.debug_struct("HookBus").field("listeners", &counts).finish()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; listeners run in registration order
    pub fn on(&mut self, event: HookEvent, listener: impl HookListener + 'static) -> &mut Self {
        self.on_arc(event, Arc::new(listener))
    }

    /// Register an async closure as a listener
    pub fn on_fn<F, Fut>(&mut self, event: HookEvent, f: F) -> &mut Self
    where
        F: Fn(Arc<HookPayload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookResponse>> + Send + 'static,
    {
        self.on(event, f)
    }

    pub fn on_arc(&mut self, event: HookEvent, listener: Arc<dyn HookListener>) -> &mut Self {
        self.listeners.entry(event).or_default().push(listener);
        self
    }

    pub fn listener_count(&self, event: HookEvent) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, event: HookEvent) -> bool {
        self.listener_count(event) > 0
    }

    /// Run every listener of `payload.event` and aggregate the outcome
    ///
    /// Never fails: listener errors are captured in [`HookDispatch::error`].
    pub async fn emit(&self, payload: HookPayload) -> HookDispatch {
        let event = payload.event;
        let Some(listeners) = self.listeners.get(&event).filter(|l| !l.is_empty()) else {
            return HookDispatch::default();
        };

        let payload = Arc::new(payload);
        let mut dispatch = HookDispatch::default();
        for (index, listener) in listeners.iter().enumerate() {
            // A failing listener never stops the ones after it
            match listener.handle(Arc::clone(&payload)).await {
                Ok(response) => {
                    if let HookResponse::Block { reason } = &response {
                        if dispatch.blocked.is_none() {
                            dispatch.blocked = Some(BlockSignal {
                                reason: reason.clone(),
                            });
                        }
                    }
                    dispatch.results.push(response);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    tracing::debug!(event = %event, index, error = %message, "Hook listener failed");
                    if dispatch.error.is_none() {
                        dispatch.error = Some(ListenerFailure { index, message });
                    }
                }
            }
        }
        dispatch
    }

    /// Emit and turn a listener failure into [`OrchestratorError::HookDispatch`]
    pub async fn emit_checked(&self, payload: HookPayload) -> Result<HookDispatch, OrchestratorError> {
        let event = payload.event;
        let dispatch = self.emit(payload).await;
        match &dispatch.error {
            Some(failure) => Err(OrchestratorError::HookDispatch {
                event,
                message: failure.message.clone(),
            }),
            None => Ok(dispatch),
        }
    }
}
