//! Per-event handling of a provider stream
//!
//! Events are consumed strictly in order. Text deltas are buffered until
//! `end`; tool calls are executed inline and schedule another iteration.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use super::invocation::AgentInvocation;
use super::loop_events::LoopEvent;
use super::orchestrator::AgentOrchestrator;
use crate::error::{OrchestratorError, Result};
use crate::hooks::{HookData, HookEvent, SerializedError};
use crate::provider::{Message, StreamEvent, ToolCall};
use crate::trace::TracePhase;

/// Tool entry text for a block without a reason
pub(crate) const BLOCKED_TOOL_MESSAGE: &str = "Tool call blocked by hook";

/// Whether to keep reading the current stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnFlow {
    Continue,
    Stop,
}

/// Accumulated state of one assistant turn
#[derive(Debug, Default)]
pub(crate) struct TurnState {
    text: String,
    /// Set once a tool call was executed or blocked
    pub continue_conversation: bool,
}

impl TurnState {
    /// Buffered text, if any, leaving the buffer empty
    pub fn take_text(&mut self) -> Option<String> {
        (!self.text.is_empty()).then(|| std::mem::take(&mut self.text))
    }
}

impl AgentOrchestrator {
    pub(super) async fn handle_event(
        &self,
        inv: &Arc<AgentInvocation>,
        iteration: usize,
        turn: &mut TurnState,
        event: StreamEvent,
    ) -> Result<TurnFlow> {
        match &event {
            StreamEvent::Delta { text } => {
                turn.text.push_str(text);
                self.emit(LoopEvent::TextDelta {
                    agent: inv.id().to_string(),
                    delta: text.clone(),
                });
                Ok(TurnFlow::Continue)
            }

            StreamEvent::ToolCall {
                id,
                name,
                arguments,
                ..
            } => {
                let call = ToolCall {
                    id: id.clone().unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                self.handle_tool_call(inv, iteration, turn, call, event).await
            }

            StreamEvent::ToolResult { name, result, .. } => {
                tracing::debug!(agent = %inv.id(), tool = %name, "Provider-side tool result");
                self.emit(LoopEvent::ProviderToolResult {
                    agent: inv.id().to_string(),
                    name: name.clone(),
                    result: result.clone(),
                });
                Ok(TurnFlow::Continue)
            }

            StreamEvent::Notification { payload, .. } => {
                self.emit(LoopEvent::Notification {
                    agent: inv.id().to_string(),
                    payload: payload.clone(),
                });
                self.dispatch(
                    inv,
                    HookEvent::Notification,
                    HookData::Notification {
                        iteration,
                        event: event.clone(),
                    },
                )
                .await?;
                Ok(TurnFlow::Continue)
            }

            StreamEvent::Error { message, .. } => {
                let err = OrchestratorError::ProviderStream(message.clone());
                self.record_failure(inv, Some(iteration), &err, Some(event.clone()), true)
                    .await?;
                Ok(TurnFlow::Stop)
            }

            StreamEvent::End { reason, usage } => {
                if let Some(text) = turn.take_text() {
                    inv.push_message(Message::assistant(text));
                }
                self.emit(LoopEvent::TurnComplete {
                    agent: inv.id().to_string(),
                    iteration,
                    reason: reason.clone(),
                    usage: usage.clone(),
                });
                self.dispatch(
                    inv,
                    HookEvent::Stop,
                    HookData::Stop {
                        iteration,
                        event: event.clone(),
                    },
                )
                .await?;
                self.trace(
                    inv,
                    TracePhase::IterationComplete,
                    Some(json!({ "iteration": iteration, "reason": reason, "usage": usage })),
                    true,
                )
                .await;
                Ok(TurnFlow::Continue)
            }
        }
    }

    async fn handle_tool_call(
        &self,
        inv: &Arc<AgentInvocation>,
        iteration: usize,
        turn: &mut TurnState,
        call: ToolCall,
        event: StreamEvent,
    ) -> Result<TurnFlow> {
        tracing::info!(agent = %inv.id(), tool = %call.name, id = %call.id, "Tool call");
        self.emit(LoopEvent::ToolCall {
            agent: inv.id().to_string(),
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        inv.push_message(Message::assistant_tool_call(call.clone()));
        self.trace(
            inv,
            TracePhase::ToolCall,
            Some(json!({ "iteration": iteration, "id": call.id, "name": call.name, "arguments": call.arguments })),
            true,
        )
        .await;

        let dispatch = self
            .dispatch(
                inv,
                HookEvent::PreToolUse,
                HookData::ToolCall {
                    iteration,
                    call: call.clone(),
                    event,
                },
            )
            .await?;

        if let Some(block) = dispatch.blocked {
            let reason = block
                .reason
                .unwrap_or_else(|| BLOCKED_TOOL_MESSAGE.to_string());
            tracing::info!(agent = %inv.id(), tool = %call.name, reason = %reason, "Tool call blocked");
            inv.push_message(Message::tool(&call, reason.clone()));
            self.emit(LoopEvent::ToolBlocked {
                agent: inv.id().to_string(),
                id: call.id.clone(),
                name: call.name.clone(),
                reason,
            });
            turn.continue_conversation = true;
            return Ok(TurnFlow::Continue);
        }

        let ctx = self.tool_context(inv, &call.id);
        match inv.tools().execute(&call, ctx).await {
            Ok(result) => {
                let transcript = result.to_transcript();
                inv.push_message(Message::tool(&call, transcript.clone()));
                self.emit(LoopEvent::ToolResult {
                    agent: inv.id().to_string(),
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: transcript,
                    is_error: false,
                });
                self.dispatch(
                    inv,
                    HookEvent::PostToolUse,
                    HookData::ToolResult {
                        iteration,
                        call: call.clone(),
                        result: result.clone(),
                    },
                )
                .await?;
                self.trace(
                    inv,
                    TracePhase::ToolResult,
                    Some(json!({ "iteration": iteration, "id": call.id, "name": call.name, "result": result })),
                    true,
                )
                .await;
                turn.continue_conversation = true;
                Ok(TurnFlow::Continue)
            }
            Err(tool_err) => {
                let message = tool_err.to_string();
                inv.push_message(Message::tool(&call, message.clone()));
                self.emit(LoopEvent::ToolResult {
                    agent: inv.id().to_string(),
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: message,
                    is_error: true,
                });

                let err = OrchestratorError::from(tool_err);
                let detail = SerializedError::from(&err);
                tracing::warn!(agent = %inv.id(), tool = %call.name, error = %detail.message, "{}", detail.name);
                self.record_failure(inv, Some(iteration), &err, None, false)
                    .await?;
                Ok(TurnFlow::Stop)
            }
        }
    }
}
