//! Runtime configuration and shared services

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::compaction::TranscriptCompactor;
use super::loop_events::LoopEvent;
use crate::hooks::HookBus;
use crate::provider::Provider;
use crate::tools::{AutoApprove, ConfirmHandler};
use crate::trace::{JsonlTraceSink, TraceSink};

const DEFAULT_MODEL: &str = "default";
/// Hard cap on model calls per invocation
pub const MAX_ITERATIONS: usize = 50;

/// Configuration for an orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub model: String,
    pub working_dir: PathBuf,
    pub max_iterations: usize,
    /// JSONL trace file; no tracing when unset
    pub trace_path: Option<PathBuf>,
    /// Keep an existing trace file instead of truncating it at root start
    pub trace_append: bool,
    /// Variables layered over the process environment for tools
    pub env: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_iterations: MAX_ITERATIONS,
            trace_path: None,
            trace_append: false,
            env: HashMap::new(),
        }
    }
}

/// Shared services the orchestrator needs.
pub struct OrchestratorServices {
    pub provider: Arc<dyn Provider>,
    pub hooks: Arc<HookBus>,
    pub confirm: Arc<dyn ConfirmHandler>,
    pub compactor: Option<Arc<dyn TranscriptCompactor>>,
    pub trace: Option<Arc<dyn TraceSink>>,
    pub events: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl OrchestratorServices {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            hooks: Arc::new(HookBus::new()),
            confirm: Arc::new(AutoApprove),
            compactor: None,
            trace: None,
            events: None,
        }
    }

    pub fn with_hooks(mut self, hooks: HookBus) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmHandler>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn TranscriptCompactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }
}

/// Config and services bundled for one orchestrator
pub struct Runtime {
    pub config: OrchestratorConfig,
    pub services: OrchestratorServices,
    /// Process environment overlaid with `config.env`
    pub env: Arc<HashMap<String, String>>,
}

impl Runtime {
    pub fn new(config: OrchestratorConfig, mut services: OrchestratorServices) -> Self {
        if services.trace.is_none() {
            if let Some(path) = &config.trace_path {
                services.trace = Some(Arc::new(JsonlTraceSink::new(path.clone())));
            }
        }

        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            config,
            services,
            env: Arc::new(env),
        }
    }

    pub(crate) fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.services.events {
            let _ = tx.send(event);
        }
    }
}
