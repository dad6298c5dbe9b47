//! Shell-command listeners
//!
//! The command receives the payload as JSON on stdin.
//!
//! ## Exit Code Protocol
//! - 0: Continue; a JSON stdout becomes the listener's value
//! - 2: Block, stderr is the reason
//! - Other: Warn with stderr, continue
//!
//! Failing to spawn or timing out is a listener failure.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::bus::{HookListener, HookResponse};
use super::events::{HookEvent, HookPayload};

const COMMAND_HOOK_TIMEOUT_SECS: u64 = 30;

/// Configuration of one command listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandHookConfig {
    /// Shell command run through `sh -c`
    pub command: String,
    /// Regex on tool names; only consulted for tool events
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug)]
pub struct CommandHook {
    event: HookEvent,
    command: String,
    matcher: Option<Regex>,
    timeout: Duration,
}

impl CommandHook {
    pub fn new(event: HookEvent, command: impl Into<String>) -> Self {
        Self {
            event,
            command: command.into(),
            matcher: None,
            timeout: Duration::from_secs(COMMAND_HOOK_TIMEOUT_SECS),
        }
    }

    pub fn from_config(event: HookEvent, config: &CommandHookConfig) -> anyhow::Result<Self> {
        let mut hook = Self::new(event, config.command.clone());
        if let Some(pattern) = &config.matcher {
            hook.matcher = Some(
                Regex::new(pattern).with_context(|| format!("invalid matcher '{pattern}'"))?,
            );
        }
        if let Some(secs) = config.timeout_secs {
            hook.timeout = Duration::from_secs(secs);
        }
        Ok(hook)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn event(&self) -> HookEvent {
        self.event
    }

    /// Tool events are filtered by the matcher; other events always run
    fn applies_to(&self, payload: &HookPayload) -> bool {
        match (&self.matcher, payload.tool_call()) {
            (Some(re), Some(call)) => re.is_match(&call.name),
            _ => true,
        }
    }
}

#[async_trait]
impl HookListener for CommandHook {
    async fn handle(&self, payload: Arc<HookPayload>) -> anyhow::Result<HookResponse> {
        if !self.applies_to(&payload) {
            return Ok(HookResponse::Continue);
        }

        let input = serde_json::to_string(&*payload).context("serialize hook payload")?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn hook command '{}'", self.command))?;

        // Feed stdin while draining output so a large payload cannot stall
        // the command; both sit under the timeout
        let stdin = child.stdin.take();
        let command = &self.command;
        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    // Commands that ignore stdin close it early
                    tracing::debug!(command = %command, "Hook stdin write failed: {}", e);
                }
            }
        };
        let run = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                anyhow!(
                    "hook command '{}' timed out after {:?}",
                    self.command,
                    self.timeout
                )
            })?
            .context("hook command failed")?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            event = %self.event,
            exit_code,
            stderr_len = stderr.len(),
            "Hook command complete"
        );

        match exit_code {
            0 => Ok(serde_json::from_str(stdout.trim())
                .map(HookResponse::Value)
                .unwrap_or(HookResponse::Continue)),
            2 => {
                let reason = if stderr.trim().is_empty() {
                    "Hook blocked execution".to_string()
                } else {
                    stderr.trim().to_string()
                };
                Ok(HookResponse::Block {
                    reason: Some(reason),
                })
            }
            _ => {
                tracing::warn!(
                    event = %self.event,
                    command = %self.command,
                    exit_code,
                    "Hook command warning: {}",
                    stderr.trim()
                );
                Ok(HookResponse::Continue)
            }
        }
    }
}
