//! Scripted provider that replays canned turns
//!
//! Each call to [`Provider::stream`] pops the next turn off a FIFO queue.
//! Used by tests and by the CLI's replay mode.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use super::{EventStream, Provider, ProviderRequest, StreamEvent};

#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: impl IntoIterator<Item = Vec<StreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Parse a JSON Lines script: one JSON array of events per line.
    pub fn from_jsonl(script: &str) -> Result<Self> {
        let mut turns = Vec::new();
        for (index, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let turn: Vec<StreamEvent> = serde_json::from_str(line)
                .with_context(|| format!("parse script line {}", index + 1))?;
            turns.push(turn);
        }
        Ok(Self::new(turns))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("read script {}", path.display()))?;
        Self::from_jsonl(&script)
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().len()
    }

    /// Requests received so far, in call order
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream> {
        self.requests.lock().push(request);
        let turn = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::error("scripted provider has no turns left")]);
        Ok(Box::pin(stream::iter(turn)))
    }
}
