//! Transcript compaction
//!
//! A compactor decides per iteration whether the transcript should shrink
//! (`plan`) and then rewrites it in place (`apply`). The orchestrator emits
//! `preCompact` between the two.

use anyhow::bail;
use serde::{Deserialize, Serialize};

use super::invocation::AgentInvocation;
use crate::provider::{Message, Role};

/// Collapse the transcript range `start..end` into one summary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionPlan {
    pub reason: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionOutcome {
    pub removed: usize,
    pub remaining: usize,
}

pub trait TranscriptCompactor: Send + Sync {
    fn plan(&self, invocation: &AgentInvocation, iteration: usize) -> Option<CompactionPlan>;

    fn apply(
        &self,
        transcript: &mut Vec<Message>,
        plan: &CompactionPlan,
    ) -> anyhow::Result<CompactionOutcome>;
}

/// Keeps the leading system entries and the most recent messages
#[derive(Debug, Clone)]
pub struct WindowCompactor {
    max_messages: usize,
    keep_recent: usize,
}

impl WindowCompactor {
    pub fn new(max_messages: usize, keep_recent: usize) -> Self {
        Self {
            max_messages,
            keep_recent: keep_recent.min(max_messages),
        }
    }
}

impl TranscriptCompactor for WindowCompactor {
    fn plan(&self, invocation: &AgentInvocation, _iteration: usize) -> Option<CompactionPlan> {
        let messages = invocation.messages();
        if messages.len() <= self.max_messages {
            return None;
        }

        let start = messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        let mut end = messages.len().saturating_sub(self.keep_recent);
        // Keep tool answers next to the call that produced them
        while end > start && messages.get(end).is_some_and(|m| m.role == Role::Tool) {
            end -= 1;
        }
        if end <= start {
            return None;
        }

        Some(CompactionPlan {
            reason: format!(
                "transcript has {} messages, limit is {}",
                messages.len(),
                self.max_messages
            ),
            start,
            end,
        })
    }

    fn apply(
        &self,
        transcript: &mut Vec<Message>,
        plan: &CompactionPlan,
    ) -> anyhow::Result<CompactionOutcome> {
        if plan.start >= plan.end || plan.end > transcript.len() {
            bail!(
                "compaction range {}..{} invalid for {} messages",
                plan.start,
                plan.end,
                transcript.len()
            );
        }

        let removed = transcript.drain(plan.start..plan.end).count();
        transcript.insert(
            plan.start,
            Message::system(format!("[{removed} earlier messages compacted]")),
        );
        Ok(CompactionOutcome {
            removed,
            remaining: transcript.len(),
        })
    }
}
