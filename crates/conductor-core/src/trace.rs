//! Invocation trace records
//!
//! One JSON object per lifecycle step. The JSONL sink appends to a file;
//! the root invocation's first record may truncate it instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::hooks::AgentMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    AgentStart,
    ModelCall,
    ToolCall,
    ToolResult,
    AgentError,
    IterationComplete,
    AgentComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub total_bytes: usize,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub phase: TracePhase,
    pub agent: AgentMetadata,
    /// User prompt the invocation was started with
    pub prompt: String,
    pub context: TraceContext,
    pub history_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for trace records
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Write one record; `append = false` replaces previous content
    async fn write(&self, record: &TraceRecord, append: bool) -> anyhow::Result<()>;
}

/// Appends records as JSON Lines to a file
pub struct JsonlTraceSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlTraceSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TraceSink for JsonlTraceSink {
    async fn write(&self, record: &TraceRecord, append: bool) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    pub fn phases(&self) -> Vec<(String, TracePhase)> {
        self.records
            .lock()
            .iter()
            .map(|r| (r.agent.id.clone(), r.phase))
            .collect()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn write(&self, record: &TraceRecord, append: bool) -> anyhow::Result<()> {
        let mut records = self.records.lock();
        if !append {
            records.clear();
        }
        records.push(record.clone());
        Ok(())
    }
}
