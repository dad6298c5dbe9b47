//! Agent orchestrator: drives invocations through the model/tool loop.
//!
//! ```text
//!  beforeAgentStart ─► [ compact? ─► beforeModelCall ─► provider stream ]* ─► afterAgentComplete
//!                                                           │
//!                               delta / tool_call / error / notification / end
//! ```
//!
//! Each iteration issues one streaming call. A tool call that executes (or
//! is blocked) schedules another iteration; a turn that only produces text
//! ends the run. Sub-agents run synchronously inside the parent's tool call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};

use super::definition::{AgentDefinition, InvocationOptions};
use super::invocation::{AgentInvocation, SpawnHandler};
use super::loop_events::LoopEvent;
use super::runtime::{OrchestratorConfig, OrchestratorServices, Runtime};
use super::stream::{TurnFlow, TurnState};
use crate::error::{OrchestratorError, Result};
use crate::hooks::{HookData, HookDispatch, HookEvent, HookPayload, SerializedError};
use crate::provider::{ProviderRequest, StreamEvent};
use crate::tools::ToolContext;
use crate::trace::{TraceContext, TracePhase, TraceRecord};

/// Runs agent invocations; cheap to clone
#[derive(Clone)]
pub struct AgentOrchestrator {
    runtime: Arc<Runtime>,
}

impl AgentOrchestrator {
    pub fn new(services: OrchestratorServices, config: OrchestratorConfig) -> Self {
        Self {
            runtime: Arc::new(Runtime::new(config, services)),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn spawn_handler(&self) -> Arc<dyn SpawnHandler> {
        Arc::new(self.clone())
    }

    /// Run a root invocation to a terminal state
    ///
    /// Returns `Ok` for both completed and failed agents; inspect
    /// [`AgentInvocation::state`]. `Err` means a must-succeed hook failed
    /// or the invocation could not be built.
    pub async fn run_agent(
        &self,
        definition: AgentDefinition,
        options: InvocationOptions,
    ) -> Result<Arc<AgentInvocation>> {
        let root = AgentInvocation::create(definition, options, None, Some(self.spawn_handler()))?;
        self.execute_invocation(&root).await?;
        Ok(root)
    }

    /// Create a child of `parent`, drive it, and record it under the parent
    pub async fn spawn_sub_agent(
        &self,
        parent: &Arc<AgentInvocation>,
        definition: AgentDefinition,
        options: InvocationOptions,
    ) -> Result<Arc<AgentInvocation>> {
        let child = AgentInvocation::create(
            definition,
            options,
            Some(parent),
            Some(self.spawn_handler()),
        )?;
        tracing::info!(parent = %parent.id(), child = %child.id(), depth = child.depth(), "Spawning sub-agent");

        let outcome = self.execute_invocation(&child).await;
        parent.push_child(Arc::clone(&child));
        outcome.map(|()| child)
    }

    async fn execute_invocation(&self, inv: &Arc<AgentInvocation>) -> Result<()> {
        if !inv.start() {
            return Err(OrchestratorError::Spawn {
                agent: inv.id().to_string(),
                reason: format!("invocation is already {}", inv.state()),
            });
        }

        let outcome = match self.run_loop(inv).await {
            Ok(()) if inv.is_failed() => Ok(()),
            Ok(()) => self.complete(inv).await,
            Err(err) => Err(err),
        };

        if let Err(err) = &outcome {
            tracing::error!(agent = %inv.id(), error = %err, "Agent aborted");
            inv.fail(err);
        }
        let outcome = outcome.and(self.emit_subagent_stop(inv).await);
        match &outcome {
            Ok(()) if !inv.is_failed() => {
                self.trace(
                    inv,
                    TracePhase::AgentComplete,
                    Some(json!({ "iterations": inv.iterations() })),
                    true,
                )
                .await;
                tracing::info!(agent = %inv.id(), iterations = inv.iterations(), "Agent completed");
            }
            Ok(()) => {}
            Err(err) => inv.fail(err),
        }
        self.runtime.emit(LoopEvent::AgentFinished {
            agent: inv.id().to_string(),
            failed: inv.is_failed(),
            iterations: inv.iterations(),
        });
        outcome
    }

    async fn run_loop(&self, inv: &Arc<AgentInvocation>) -> Result<()> {
        let config = &self.runtime.config;

        self.dispatch(
            inv,
            HookEvent::BeforeAgentStart,
            HookData::AgentStart {
                prompt: inv.prompt().to_string(),
            },
        )
        .await?;
        // Only the root may start a fresh trace file
        let append = !inv.is_root() || config.trace_append;
        self.trace(inv, TracePhase::AgentStart, None, append).await;
        self.runtime.emit(LoopEvent::AgentStarted {
            agent: inv.id().to_string(),
            depth: inv.depth(),
        });
        tracing::info!(agent = %inv.id(), depth = inv.depth(), "Agent started");

        let mut iteration = 0;
        let mut continue_conversation = true;
        while continue_conversation {
            continue_conversation = false;
            iteration += 1;

            if iteration > config.max_iterations {
                tracing::warn!(agent = %inv.id(), limit = config.max_iterations, "Iteration limit reached");
                let err = OrchestratorError::IterationLimit {
                    agent: inv.id().to_string(),
                    limit: config.max_iterations,
                };
                self.record_failure(inv, Some(iteration - 1), &err, None, false)
                    .await?;
                break;
            }
            inv.set_iterations(iteration);

            self.maybe_compact(inv, iteration).await?;

            let messages = inv.messages();
            self.dispatch(
                inv,
                HookEvent::BeforeModelCall,
                HookData::ModelCall {
                    iteration,
                    messages: messages.clone(),
                },
            )
            .await?;
            self.trace(
                inv,
                TracePhase::ModelCall,
                Some(json!({ "iteration": iteration, "messageCount": messages.len() })),
                true,
            )
            .await;

            let tools = inv.tools();
            let request = ProviderRequest {
                model: config.model.clone(),
                messages,
                tools: (!tools.is_empty()).then(|| tools.schemas()),
            };

            let provider = &self.runtime.services.provider;
            let mut stream = match provider.stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    let err = OrchestratorError::Provider {
                        provider: provider.name().to_string(),
                        message: format!("{e:#}"),
                    };
                    self.record_failure(inv, Some(iteration), &err, None, true)
                        .await?;
                    break;
                }
            };

            let mut turn = TurnState::default();
            while let Some(event) = stream.next().await {
                if self.handle_event(inv, iteration, &mut turn, event).await? == TurnFlow::Stop {
                    break;
                }
            }
            // Dropping the stream cancels whatever the provider still had queued
            drop(stream);

            if inv.is_failed() {
                break;
            }
            if let Some(text) = turn.take_text() {
                tracing::debug!(agent = %inv.id(), "Stream ended without end event; flushing text");
                inv.push_message(crate::provider::Message::assistant(text));
            }
            continue_conversation = turn.continue_conversation;
        }

        Ok(())
    }

    async fn complete(&self, inv: &Arc<AgentInvocation>) -> Result<()> {
        inv.complete();
        self.dispatch(
            inv,
            HookEvent::AfterAgentComplete,
            HookData::AgentComplete {
                iterations: inv.iterations(),
                messages: inv.messages(),
            },
        )
        .await?;
        Ok(())
    }

    async fn maybe_compact(&self, inv: &Arc<AgentInvocation>, iteration: usize) -> Result<()> {
        let Some(compactor) = &self.runtime.services.compactor else {
            return Ok(());
        };
        let Some(plan) = compactor.plan(inv, iteration) else {
            return Ok(());
        };

        self.dispatch(
            inv,
            HookEvent::PreCompact,
            HookData::PreCompact {
                iteration,
                plan: plan.clone(),
            },
        )
        .await?;

        match inv.compact_with(|messages| compactor.apply(messages, &plan)) {
            Ok(outcome) => {
                tracing::info!(
                    agent = %inv.id(),
                    removed = outcome.removed,
                    remaining = outcome.remaining,
                    reason = %plan.reason,
                    "Transcript compacted"
                );
                self.runtime.emit(LoopEvent::Compacted {
                    agent: inv.id().to_string(),
                    removed: outcome.removed,
                    remaining: outcome.remaining,
                });
            }
            Err(e) => tracing::warn!(agent = %inv.id(), "Compaction failed: {:#}", e),
        }
        Ok(())
    }

    /// Mark `inv` failed and run the error hooks and trace
    ///
    /// `provider_error` also fires `onError` ahead of `onAgentError`.
    pub(super) async fn record_failure(
        &self,
        inv: &Arc<AgentInvocation>,
        iteration: Option<usize>,
        err: &OrchestratorError,
        event: Option<StreamEvent>,
        provider_error: bool,
    ) -> Result<()> {
        tracing::warn!(agent = %inv.id(), error = %err, "Agent failed");
        inv.fail(err);
        self.runtime.emit(LoopEvent::Error {
            agent: inv.id().to_string(),
            error: err.to_string(),
        });

        let data = HookData::Error {
            iteration,
            error: SerializedError::from(err),
            event,
        };
        if provider_error {
            self.dispatch(inv, HookEvent::OnError, data.clone()).await?;
        }
        self.dispatch(inv, HookEvent::OnAgentError, data).await?;

        self.trace(
            inv,
            TracePhase::AgentError,
            Some(json!({ "iteration": iteration, "error": SerializedError::from(err) })),
            true,
        )
        .await;
        Ok(())
    }

    async fn emit_subagent_stop(&self, inv: &Arc<AgentInvocation>) -> Result<()> {
        if inv.is_root() || !inv.mark_subagent_stop() {
            return Ok(());
        }
        self.dispatch(
            inv,
            HookEvent::SubagentStop,
            HookData::SubagentStop {
                failed: inv.is_failed(),
                error: inv.error().map(|e| e.message),
            },
        )
        .await?;
        Ok(())
    }

    fn payload(&self, inv: &AgentInvocation, event: HookEvent, data: HookData) -> HookPayload {
        HookPayload::new(event, inv.metadata(), data)
    }

    /// Emit `event` to its listeners
    ///
    /// A listener failure aborts the invocation when the event
    /// [must succeed](HookEvent::must_succeed); otherwise it is only logged.
    pub(super) async fn dispatch(
        &self,
        inv: &AgentInvocation,
        event: HookEvent,
        data: HookData,
    ) -> Result<HookDispatch> {
        let hooks = &self.runtime.services.hooks;
        if !hooks.has_listeners(event) {
            return Ok(HookDispatch::default());
        }
        let payload = self.payload(inv, event, data);
        if event.must_succeed() {
            return hooks.emit_checked(payload).await;
        }

        let dispatch = hooks.emit(payload).await;
        if let Some(failure) = &dispatch.error {
            tracing::warn!(agent = %inv.id(), event = %event, "Hook listener failed: {}", failure.message);
        }
        Ok(dispatch)
    }

    pub(super) async fn trace(
        &self,
        inv: &AgentInvocation,
        phase: TracePhase,
        data: Option<Value>,
        append: bool,
    ) {
        let Some(sink) = &self.runtime.services.trace else {
            return;
        };
        let record = TraceRecord {
            phase,
            agent: inv.metadata(),
            prompt: inv.prompt().to_string(),
            context: TraceContext {
                total_bytes: inv.context().total_bytes,
                file_count: inv.context().file_count(),
            },
            history_length: inv.history_len(),
            data,
            timestamp: Utc::now(),
        };
        if let Err(e) = sink.write(&record, append).await {
            tracing::warn!(agent = %inv.id(), "Failed to write trace record: {:#}", e);
        }
    }

    pub(super) fn tool_context(&self, inv: &Arc<AgentInvocation>, call_id: &str) -> ToolContext {
        ToolContext::new(
            self.runtime.config.working_dir.clone(),
            Arc::clone(&self.runtime.env),
            Arc::clone(&self.runtime.services.confirm),
        )
        .with_tool_call_id(call_id)
        .with_invocation(Arc::clone(inv))
    }

    pub(super) fn emit(&self, event: LoopEvent) {
        self.runtime.emit(event);
    }
}

#[async_trait]
impl SpawnHandler for AgentOrchestrator {
    async fn spawn(
        &self,
        parent: &Arc<AgentInvocation>,
        definition: AgentDefinition,
        options: InvocationOptions,
    ) -> Result<Arc<AgentInvocation>> {
        self.spawn_sub_agent(parent, definition, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::compaction::WindowCompactor;
    use crate::agent::invocation::{collect_invocations, InvocationState};
    use crate::agent::stream::BLOCKED_TOOL_MESSAGE;
    use crate::hooks::{HookBus, HookResponse};
    use crate::provider::{EventStream, Provider, Role, ScriptedProvider};
    use crate::tools::{delegate_tool, ToolDefinition, ToolResult, DELEGATE_TOOL_NAME};
    use crate::trace::{MemoryTraceSink, TraceSink};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    fn orchestrator(
        provider: Arc<dyn Provider>,
        hooks: HookBus,
        config: OrchestratorConfig,
    ) -> (AgentOrchestrator, Arc<MemoryTraceSink>) {
        let trace = Arc::new(MemoryTraceSink::new());
        let services = OrchestratorServices::new(provider)
            .with_hooks(hooks)
            .with_trace_sink(Arc::clone(&trace) as Arc<dyn TraceSink>);
        (AgentOrchestrator::new(services, config), trace)
    }

    fn scripted(turns: Vec<Vec<StreamEvent>>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(turns))
    }

    /// Record `event:agent` for every emission of `events`
    fn record(bus: &mut HookBus, log: &Log, events: &[HookEvent]) {
        for event in events {
            let log = Arc::clone(log);
            bus.on_fn(*event, move |p: Arc<HookPayload>| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(format!("{}:{}", p.event, p.agent.id));
                    Ok(HookResponse::Continue)
                }
            });
        }
    }

    fn echo_tool(calls: &Arc<AtomicUsize>) -> ToolDefinition {
        let calls = Arc::clone(calls);
        ToolDefinition::from_fn(
            "echo",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
            move |args: Value, _ctx: ToolContext| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let text = args["text"].as_str().unwrap_or_default().to_string();
                    Ok(ToolResult::text(text).into())
                }
            },
        )
    }

    fn echo_call(text: Value) -> StreamEvent {
        StreamEvent::ToolCall {
            id: Some("call-1".to_string()),
            name: "echo".to_string(),
            arguments: json!({ "text": text }),
            raw: None,
        }
    }

    struct OfflineProvider;

    #[async_trait]
    impl Provider for OfflineProvider {
        fn name(&self) -> &str {
            "offline"
        }

        async fn stream(&self, _request: ProviderRequest) -> anyhow::Result<EventStream> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn deltas_become_one_assistant_entry() {
        let provider = scripted(vec![vec![
            StreamEvent::delta("a"),
            StreamEvent::delta("b"),
            StreamEvent::end(),
        ]]);
        let (orch, _) = orchestrator(provider, HookBus::new(), OrchestratorConfig::default());

        let root = orch
            .run_agent(AgentDefinition::new("solo", "sys"), InvocationOptions::new("hi"))
            .await
            .unwrap();

        let messages = root.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "ab");
        assert_eq!(root.state(), InvocationState::Completed);
        assert_eq!(root.iterations(), 1);
    }

    #[tokio::test]
    async fn executed_tool_call_starts_another_iteration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = scripted(vec![
            vec![echo_call(json!("ping")), StreamEvent::end()],
            vec![StreamEvent::delta("done"), StreamEvent::end()],
        ]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        record(&mut bus, &log, &[HookEvent::PostToolUse, HookEvent::Stop]);
        let (orch, trace) = orchestrator(provider.clone(), bus, OrchestratorConfig::default());

        let root = orch
            .run_agent(
                AgentDefinition::new("root", "sys").with_tool(echo_tool(&calls)),
                InvocationOptions::new("go"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(root.iterations(), 2);
        let messages = root.messages();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(messages[2].tool_calls[0].name, "echo");
        assert_eq!(messages[3].content, r#"{"schema":"text","content":"ping"}"#);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(messages[4].content, "done");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(1));
        assert_eq!(requests[1].messages.len(), 4);

        assert_eq!(
            *log.lock(),
            vec!["postToolUse:root", "stop:root", "stop:root"]
        );
        let phases: Vec<TracePhase> = trace.records().iter().map(|r| r.phase).collect();
        assert_eq!(
            phases,
            vec![
                TracePhase::AgentStart,
                TracePhase::ModelCall,
                TracePhase::ToolCall,
                TracePhase::ToolResult,
                TracePhase::IterationComplete,
                TracePhase::ModelCall,
                TracePhase::IterationComplete,
                TracePhase::AgentComplete,
            ]
        );
    }

    #[tokio::test]
    async fn blocked_tool_call_is_never_executed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = scripted(vec![
            vec![echo_call(json!("secret")), StreamEvent::delta("after"), StreamEvent::end()],
            vec![StreamEvent::delta("ok"), StreamEvent::end()],
        ]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        bus.on_fn(HookEvent::PreToolUse, |_p: Arc<HookPayload>| async move {
            Ok(HookResponse::block("policy veto"))
        });
        record(&mut bus, &log, &[HookEvent::PostToolUse]);
        let (orch, _) = orchestrator(provider, bus, OrchestratorConfig::default());

        let root = orch
            .run_agent(
                AgentDefinition::new("root", "sys").with_tool(echo_tool(&calls)),
                InvocationOptions::new("go"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(log.lock().is_empty());
        let messages = root.messages();
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].content, "policy veto");
        // The turn kept streaming after the veto
        assert_eq!(messages[4].content, "after");
        assert_eq!(messages[5].content, "ok");
        assert_eq!(root.state(), InvocationState::Completed);
    }

    #[tokio::test]
    async fn block_without_reason_uses_default_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = scripted(vec![
            vec![echo_call(json!("x")), StreamEvent::end()],
            vec![StreamEvent::end()],
        ]);
        let mut bus = HookBus::new();
        bus.on_fn(HookEvent::PreToolUse, |_p: Arc<HookPayload>| async move {
            Ok(HookResponse::Block { reason: None })
        });
        let (orch, _) = orchestrator(provider, bus, OrchestratorConfig::default());

        let root = orch
            .run_agent(
                AgentDefinition::new("root", "sys").with_tool(echo_tool(&calls)),
                InvocationOptions::new("go"),
            )
            .await
            .unwrap();
        assert_eq!(root.messages()[3].content, BLOCKED_TOOL_MESSAGE);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_agent_before_handler_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = scripted(vec![vec![
            echo_call(json!(42)),
            StreamEvent::delta("never buffered"),
            StreamEvent::end(),
        ]]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        record(
            &mut bus,
            &log,
            &[HookEvent::OnError, HookEvent::OnAgentError, HookEvent::Stop, HookEvent::AfterAgentComplete],
        );
        let (orch, trace) = orchestrator(provider, bus, OrchestratorConfig::default());

        let root = orch
            .run_agent(
                AgentDefinition::new("root", "sys").with_tool(echo_tool(&calls)),
                InvocationOptions::new("go"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(root.state(), InvocationState::Failed);
        assert_eq!(root.error().unwrap().name, "ValidationError");
        let last = root.messages().pop().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.content.starts_with("Invalid arguments for tool 'echo'"));
        assert_eq!(*log.lock(), vec!["onAgentError:root"]);
        assert_eq!(
            trace.records().last().map(|r| r.phase),
            Some(TracePhase::AgentError)
        );
    }

    #[tokio::test]
    async fn unknown_tool_fails_agent() {
        let provider = scripted(vec![vec![StreamEvent::tool_call("nope", json!({}))]]);
        let (orch, _) = orchestrator(provider, HookBus::new(), OrchestratorConfig::default());

        let root = orch
            .run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
            .await
            .unwrap();
        assert_eq!(root.error().unwrap().name, "UnknownTool");
        assert_eq!(root.messages().last().unwrap().content, "Unknown tool: nope");
    }

    #[tokio::test]
    async fn stream_error_fires_on_error_then_on_agent_error() {
        let provider = scripted(vec![vec![
            StreamEvent::delta("partial"),
            StreamEvent::error("overloaded"),
            StreamEvent::delta("ignored"),
        ]]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        record(&mut bus, &log, &[HookEvent::OnError, HookEvent::OnAgentError]);
        let (orch, _) = orchestrator(provider, bus, OrchestratorConfig::default());

        let root = orch
            .run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
            .await
            .unwrap();

        assert!(root.is_failed());
        assert_eq!(root.error().unwrap().name, "ProviderStreamError");
        assert_eq!(*log.lock(), vec!["onError:root", "onAgentError:root"]);
        assert_eq!(root.message_count(), 2);
    }

    #[tokio::test]
    async fn provider_open_failure_fails_agent() {
        let (orch, _) = orchestrator(
            Arc::new(OfflineProvider),
            HookBus::new(),
            OrchestratorConfig::default(),
        );
        let root = orch
            .run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
            .await
            .unwrap();
        let error = root.error().unwrap();
        assert_eq!(error.name, "ProviderError");
        assert!(error.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn must_succeed_listener_failure_aborts_run() {
        let provider = scripted(vec![vec![StreamEvent::delta("x"), StreamEvent::end()]]);
        let mut bus = HookBus::new();
        bus.on_fn(HookEvent::BeforeModelCall, |_p: Arc<HookPayload>| async move {
            Err(anyhow::anyhow!("listener crashed"))
        });
        let (orch, _) = orchestrator(provider.clone(), bus, OrchestratorConfig::default());

        let err = orch
            .run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::HookDispatch { event: HookEvent::BeforeModelCall, .. }
        ));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn advisory_listener_failure_is_ignored() {
        let provider = scripted(vec![vec![
            StreamEvent::notification(json!({"rate_limit": "low"})),
            StreamEvent::delta("fine"),
            StreamEvent::end(),
        ]]);
        let mut bus = HookBus::new();
        bus.on_fn(HookEvent::Notification, |_p: Arc<HookPayload>| async move {
            Err(anyhow::anyhow!("notifier offline"))
        });
        let (orch, _) = orchestrator(provider, bus, OrchestratorConfig::default());

        let root = orch
            .run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
            .await
            .unwrap();
        assert_eq!(root.state(), InvocationState::Completed);
        assert_eq!(root.messages().last().unwrap().content, "fine");
    }

    #[tokio::test]
    async fn iteration_cap_fails_agent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = scripted(vec![
            vec![echo_call(json!("1")), StreamEvent::end()],
            vec![echo_call(json!("2")), StreamEvent::end()],
            vec![echo_call(json!("3")), StreamEvent::end()],
        ]);
        let config = OrchestratorConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let (orch, _) = orchestrator(provider.clone(), HookBus::new(), config);

        let root = orch
            .run_agent(
                AgentDefinition::new("root", "sys").with_tool(echo_tool(&calls)),
                InvocationOptions::new("go"),
            )
            .await
            .unwrap();
        assert_eq!(root.error().unwrap().name, "IterationLimit");
        assert_eq!(root.iterations(), 2);
        assert_eq!(provider.remaining_turns(), 1);
    }

    #[tokio::test]
    async fn provider_side_results_stay_out_of_transcript() {
        let provider = scripted(vec![vec![
            StreamEvent::ToolResult {
                id: None,
                name: "web_search".to_string(),
                result: json!({"hits": 3}),
            },
            StreamEvent::delta("answer"),
        ]]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let services = OrchestratorServices::new(provider).with_event_sender(tx);
        let orch = AgentOrchestrator::new(services, OrchestratorConfig::default());

        let root = orch
            .run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
            .await
            .unwrap();

        // Stream ended without `end`: buffered text is still kept
        let roles: Vec<Role> = root.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
        }
        assert_eq!(
            kinds,
            vec![
                json!("agent_started"),
                json!("provider_tool_result"),
                json!("text_delta"),
                json!("agent_finished"),
            ]
        );
    }

    #[tokio::test]
    async fn compaction_runs_before_model_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = scripted(vec![
            vec![echo_call(json!("1")), StreamEvent::end()],
            vec![echo_call(json!("2")), StreamEvent::end()],
            vec![StreamEvent::delta("done"), StreamEvent::end()],
        ]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        record(&mut bus, &log, &[HookEvent::PreCompact]);
        let services = OrchestratorServices::new(provider.clone())
            .with_hooks(bus)
            .with_compactor(Arc::new(WindowCompactor::new(4, 2)));
        let orch = AgentOrchestrator::new(services, OrchestratorConfig::default());

        let root = orch
            .run_agent(
                AgentDefinition::new("root", "sys").with_tool(echo_tool(&calls)),
                InvocationOptions::new("go"),
            )
            .await
            .unwrap();

        assert_eq!(root.state(), InvocationState::Completed);
        assert!(!log.lock().is_empty());
        let last_request = provider.requests().pop().unwrap();
        assert!(last_request.messages.len() <= 4);
        assert!(last_request
            .messages
            .iter()
            .any(|m| m.content.contains("earlier messages compacted")));
    }

    #[tokio::test]
    async fn manager_delegates_to_worker() {
        let provider = scripted(vec![
            vec![
                StreamEvent::tool_call(
                    DELEGATE_TOOL_NAME,
                    json!({"agent": "worker", "prompt": "do the thing"}),
                ),
                StreamEvent::end(),
            ],
            vec![StreamEvent::delta("sub"), StreamEvent::end()],
            vec![StreamEvent::delta("manager"), StreamEvent::end()],
        ]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        record(&mut bus, &log, &[HookEvent::SubagentStop, HookEvent::AfterAgentComplete]);
        let (orch, trace) = orchestrator(provider, bus, OrchestratorConfig::default());

        let worker = AgentDefinition::new("worker", "You do work.");
        let manager = AgentDefinition::new("manager", "You delegate.")
            .with_tool(delegate_tool([worker]));
        let root = orch
            .run_agent(manager, InvocationOptions::new("plan"))
            .await
            .unwrap();

        let all = collect_invocations(&root);
        let ids: Vec<&str> = all.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["manager", "worker"]);

        let worker = &all[1];
        assert_eq!(worker.depth(), root.depth() + 1);
        assert_eq!(worker.parent_id(), Some("manager"));
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.messages().last().unwrap().content, "manager");
        assert_eq!(worker.messages().last().unwrap().content, "sub");
        assert_eq!(worker.state(), InvocationState::Completed);

        let delegate_result = root
            .messages()
            .into_iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        let envelope: ToolResult = serde_json::from_str(&delegate_result.content).unwrap();
        assert_eq!(envelope.schema, crate::tools::DELEGATE_RESULT_SCHEMA);
        assert_eq!(
            envelope.data,
            Some(json!({"agent": "worker", "failed": false, "output": "sub"}))
        );

        assert_eq!(
            *log.lock(),
            vec![
                "afterAgentComplete:worker",
                "subagentStop:worker",
                "afterAgentComplete:manager",
            ]
        );

        let starts: Vec<String> = trace
            .phases()
            .into_iter()
            .filter(|(_, phase)| *phase == TracePhase::AgentStart)
            .map(|(agent, _)| agent)
            .collect();
        assert_eq!(starts, vec!["manager", "worker"]);
    }

    #[tokio::test]
    async fn failing_sub_agent_reports_once_and_fails_parent_tool() {
        let provider = scripted(vec![vec![StreamEvent::tool_call(
            DELEGATE_TOOL_NAME,
            json!({"agent": "worker", "prompt": "x"}),
        )]]);
        let log: Log = Arc::default();
        let mut bus = HookBus::new();
        bus.on_fn(HookEvent::BeforeAgentStart, |p: Arc<HookPayload>| async move {
            if p.agent.is_root {
                Ok(HookResponse::Continue)
            } else {
                Err(anyhow::anyhow!("workers disabled"))
            }
        });
        record(&mut bus, &log, &[HookEvent::SubagentStop]);
        let (orch, _) = orchestrator(provider, bus, OrchestratorConfig::default());

        let manager = AgentDefinition::new("manager", "sys")
            .with_tool(delegate_tool([AgentDefinition::new("worker", "w")]));
        let root = orch
            .run_agent(manager, InvocationOptions::new("go"))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["subagentStop:worker"]);
        let worker = &root.children()[0];
        assert!(worker.is_failed());
        assert_eq!(worker.error().unwrap().name, "HookDispatchFailure");
        assert!(root.is_failed());
        assert_eq!(root.error().unwrap().name, "ToolExecutionFailure");
    }

    #[tokio::test]
    async fn trace_append_controls_root_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        for append in [false, true] {
            std::fs::write(&path, "{\"stale\": true}\n").unwrap();
            let provider = scripted(vec![vec![StreamEvent::delta("x"), StreamEvent::end()]]);
            let config = OrchestratorConfig {
                trace_path: Some(path.clone()),
                trace_append: append,
                ..Default::default()
            };
            let orch = AgentOrchestrator::new(OrchestratorServices::new(provider), config);
            orch.run_agent(AgentDefinition::new("root", "sys"), InvocationOptions::new("go"))
                .await
                .unwrap();

            let contents = std::fs::read_to_string(&path).unwrap();
            let first: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
            if append {
                assert_eq!(first, json!({"stale": true}));
            } else {
                assert_eq!(first["phase"], "agent_start");
                assert_eq!(first["prompt"], "go");
                assert_eq!(first["agent"]["isRoot"], true);
            }
        }
    }

    fn delegating_script() -> Arc<ScriptedProvider> {
        scripted(vec![
            vec![
                StreamEvent::tool_call(
                    DELEGATE_TOOL_NAME,
                    json!({"agent": "worker", "prompt": "go"}),
                ),
                StreamEvent::end(),
            ],
            vec![StreamEvent::delta("sub"), StreamEvent::end()],
            vec![StreamEvent::delta("manager"), StreamEvent::end()],
        ])
    }

    fn manager() -> AgentDefinition {
        AgentDefinition::new("manager", "sys")
            .with_tool(delegate_tool([AgentDefinition::new("worker", "w")]))
    }

    #[tokio::test]
    async fn agent_complete_is_traced_after_subagent_stop() {
        let trace = Arc::new(MemoryTraceSink::new());
        let seen_at_stop: Arc<Mutex<Vec<(String, TracePhase)>>> = Arc::default();
        let mut bus = HookBus::new();
        {
            let trace = Arc::clone(&trace);
            let seen = Arc::clone(&seen_at_stop);
            bus.on_fn(HookEvent::SubagentStop, move |_p: Arc<HookPayload>| {
                let trace = Arc::clone(&trace);
                let seen = Arc::clone(&seen);
                async move {
                    *seen.lock() = trace.phases();
                    Ok(HookResponse::Continue)
                }
            });
        }
        let services = OrchestratorServices::new(delegating_script())
            .with_hooks(bus)
            .with_trace_sink(Arc::clone(&trace) as Arc<dyn TraceSink>);
        let orch = AgentOrchestrator::new(services, OrchestratorConfig::default());

        orch.run_agent(manager(), InvocationOptions::new("plan"))
            .await
            .unwrap();

        let worker_complete = ("worker".to_string(), TracePhase::AgentComplete);
        assert!(!seen_at_stop.lock().contains(&worker_complete));
        assert!(trace.phases().contains(&worker_complete));
    }

    #[tokio::test]
    async fn best_effort_listener_failures_never_abort() {
        assert!(!HookEvent::SubagentStop.must_succeed());
        assert!(!HookEvent::PreCompact.must_succeed());

        let mut bus = HookBus::new();
        for event in [HookEvent::SubagentStop, HookEvent::PreCompact] {
            bus.on_fn(event, |_p: Arc<HookPayload>| async move {
                Err(anyhow::anyhow!("listener offline"))
            });
        }
        let services = OrchestratorServices::new(delegating_script())
            .with_hooks(bus)
            .with_compactor(Arc::new(WindowCompactor::new(2, 1)));
        let orch = AgentOrchestrator::new(services, OrchestratorConfig::default());

        let root = orch
            .run_agent(manager(), InvocationOptions::new("plan"))
            .await
            .unwrap();

        assert_eq!(root.state(), InvocationState::Completed);
        assert_eq!(root.children()[0].state(), InvocationState::Completed);
        assert_eq!(root.messages().last().unwrap().content, "manager");
    }
}
