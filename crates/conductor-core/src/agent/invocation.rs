//! Agent invocations and the invocation tree
//!
//! An invocation is one run of an agent definition. Children hold a weak
//! link to their parent; parents own their children. Locks are never held
//! across an await.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::compaction::CompactionOutcome;
use super::context::PackedContext;
use super::definition::{AgentDefinition, InvocationOptions};
use crate::error::{OrchestratorError, Result};
use crate::hooks::{AgentMetadata, SerializedError};
use crate::provider::{Message, Role};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Created,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationState::Created => "created",
            InvocationState::Running => "running",
            InvocationState::Completed => "completed",
            InvocationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives a freshly spawned child to completion
#[async_trait]
pub trait SpawnHandler: Send + Sync {
    async fn spawn(
        &self,
        parent: &Arc<AgentInvocation>,
        definition: AgentDefinition,
        options: InvocationOptions,
    ) -> Result<Arc<AgentInvocation>>;
}

pub struct AgentInvocation {
    key: Uuid,
    id: String,
    parent: Option<Weak<AgentInvocation>>,
    parent_id: Option<String>,
    depth: usize,
    system_prompt: String,
    prompt: String,
    context: PackedContext,
    history_len: usize,
    tools: ToolRegistry,
    messages: RwLock<Vec<Message>>,
    children: RwLock<Vec<Arc<AgentInvocation>>>,
    state: RwLock<InvocationState>,
    error: RwLock<Option<SerializedError>>,
    iterations: AtomicUsize,
    subagent_stop_sent: AtomicBool,
    spawner: Option<Arc<dyn SpawnHandler>>,
}

impl fmt::Debug for AgentInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentInvocation")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("state", &self.state())
            .field("messages", &self.message_count())
            .field("children", &self.children.read().len())
            .finish_non_exhaustive()
    }
}

impl AgentInvocation {
    /// Build an invocation and its initial transcript
    ///
    /// The transcript starts with the rendered system prompt, then the
    /// packed context (if any), then history, then the user prompt.
    pub fn create(
        definition: AgentDefinition,
        options: InvocationOptions,
        parent: Option<&Arc<AgentInvocation>>,
        spawner: Option<Arc<dyn SpawnHandler>>,
    ) -> Result<Arc<Self>> {
        let system_prompt = definition.render_system_prompt(&options.variables)?;
        let tools = ToolRegistry::from_definitions(definition.tools)?;
        let context = options.context.or(definition.context).unwrap_or_default();

        let mut messages = Vec::with_capacity(options.history.len() + 3);
        messages.push(Message::system(system_prompt.clone()));
        if !context.is_empty() {
            messages.push(Message::system(context.rendered.clone()));
        }
        let history_len = options.history.len();
        messages.extend(options.history);
        if !options.prompt.is_empty() {
            messages.push(Message::user(options.prompt.clone()));
        }

        Ok(Arc::new(Self {
            key: Uuid::new_v4(),
            id: definition.id,
            parent: parent.map(Arc::downgrade),
            parent_id: parent.map(|p| p.id.clone()),
            depth: parent.map_or(0, |p| p.depth + 1),
            system_prompt,
            prompt: options.prompt,
            context,
            history_len,
            tools,
            messages: RwLock::new(messages),
            children: RwLock::new(Vec::new()),
            state: RwLock::new(InvocationState::Created),
            error: RwLock::new(None),
            iterations: AtomicUsize::new(0),
            subagent_stop_sent: AtomicBool::new(false),
            spawner,
        }))
    }

    /// Unique per invocation, unlike `id` which names the definition
    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<Arc<AgentInvocation>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn context(&self) -> &PackedContext {
        &self.context
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Snapshot of the transcript
    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn push_message(&self, message: Message) {
        self.messages.write().push(message);
    }

    /// Final assistant answer, ignoring tool-call placeholders
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .read()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.tool_calls.is_empty())
            .map(|m| m.content.clone())
    }

    pub(crate) fn compact_with(
        &self,
        apply: impl FnOnce(&mut Vec<Message>) -> anyhow::Result<CompactionOutcome>,
    ) -> anyhow::Result<CompactionOutcome> {
        let mut messages = self.messages.write();
        apply(&mut messages)
    }

    pub fn children(&self) -> Vec<Arc<AgentInvocation>> {
        self.children.read().clone()
    }

    pub(crate) fn push_child(&self, child: Arc<AgentInvocation>) {
        self.children.write().push(child);
    }

    pub fn state(&self) -> InvocationState {
        *self.state.read()
    }

    pub fn is_failed(&self) -> bool {
        self.state() == InvocationState::Failed
    }

    pub fn error(&self) -> Option<SerializedError> {
        self.error.read().clone()
    }

    /// Created -> Running. Returns false if the invocation already started.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.state.write();
        if *state != InvocationState::Created {
            return false;
        }
        *state = InvocationState::Running;
        true
    }

    pub(crate) fn complete(&self) {
        let mut state = self.state.write();
        if *state == InvocationState::Running {
            *state = InvocationState::Completed;
        }
    }

    /// Record the first failure; later failures keep the original error
    pub(crate) fn fail(&self, err: &OrchestratorError) {
        *self.state.write() = InvocationState::Failed;
        let mut slot = self.error.write();
        if slot.is_none() {
            *slot = Some(SerializedError::from(err));
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::SeqCst)
    }

    pub(crate) fn set_iterations(&self, n: usize) {
        self.iterations.store(n, Ordering::SeqCst);
    }

    /// Returns true the first time only
    pub(crate) fn mark_subagent_stop(&self) -> bool {
        !self.subagent_stop_sent.swap(true, Ordering::SeqCst)
    }

    /// Snapshot for hook payloads and trace records
    pub fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            depth: self.depth,
            is_root: self.is_root(),
            system_prompt: self.system_prompt.clone(),
            tools: self.tools.names(),
        }
    }

    /// Spawn a child under this invocation and drive it to a terminal state
    ///
    /// Only a running invocation may spawn.
    pub async fn spawn(
        self: &Arc<Self>,
        definition: AgentDefinition,
        options: InvocationOptions,
    ) -> Result<Arc<AgentInvocation>> {
        let state = self.state();
        if state != InvocationState::Running {
            return Err(OrchestratorError::Spawn {
                agent: self.id.clone(),
                reason: format!("invocation is {state}"),
            });
        }
        let Some(spawner) = self.spawner.clone() else {
            return Err(OrchestratorError::Spawn {
                agent: self.id.clone(),
                reason: "no spawn handler attached".to_string(),
            });
        };
        spawner.spawn(self, definition, options).await
    }
}

/// Breadth-first walk of the tree rooted at `root`
pub fn collect_invocations(root: &Arc<AgentInvocation>) -> Vec<Arc<AgentInvocation>> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([Arc::clone(root)]);
    while let Some(node) = queue.pop_front() {
        queue.extend(node.children());
        out.push(node);
    }
    out
}
