//! `conductor.toml` loading
//!
//! ```toml
//! [orchestrator]
//! model = "scripted"
//! max_iterations = 20
//!
//! [[agents]]
//! id = "manager"
//! system_prompt = "You coordinate {{ team }}."
//! variables = { team = "writers" }
//! delegates = ["writer"]
//!
//! [[agents]]
//! id = "writer"
//! system_prompt = "You write."
//! context_dir = "docs"
//!
//! [[policy]]
//! tool = "^shell$"
//! reason = "shell is disabled"
//!
//! [hooks]
//! preToolUse = [{ command = "./audit.sh", matcher = "delegate" }]
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use conductor_core::agent::{ContextPacker, TranscriptCompactor, WindowCompactor};
use conductor_core::hooks::{CommandHookConfig, LoggingHook, ToolPolicyHook};
use conductor_core::tools::delegate_tool;
use conductor_core::{AgentDefinition, HookBus, HookEvent, HookModule, OrchestratorConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub orchestrator: OrchestratorConfig,
    pub agents: Vec<AgentConfig>,
    /// Command hooks keyed by event name
    pub hooks: BTreeMap<String, Vec<CommandHookConfig>>,
    pub policy: Vec<PolicyConfig>,
    pub compaction: Option<CompactionConfig>,
    /// Attach the logging hook to every event
    pub log_hooks: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub system_prompt: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Agents reachable through the `delegate` tool
    #[serde(default)]
    pub delegates: Vec<String>,
    /// Directory packed into the agent's context, relative to the working dir
    #[serde(default)]
    pub context_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Regex on tool names
    pub tool: String,
    /// Regex on serialized arguments
    #[serde(default)]
    pub arguments: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CompactionConfig {
    pub max_messages: usize,
    pub keep_recent: usize,
}

impl ConductorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::parse(&content)?;

        // Relative working dirs are taken from the config file's location
        if config.orchestrator.working_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.orchestrator.working_dir = parent.join(&config.orchestrator.working_dir);
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    /// Build the definition for `entry` (first agent when `None`)
    ///
    /// Delegates are resolved recursively; an agent may not delegate to
    /// one of its ancestors.
    pub fn agent(&self, entry: Option<&str>) -> Result<AgentDefinition> {
        let by_id: HashMap<&str, &AgentConfig> =
            self.agents.iter().map(|a| (a.id.as_str(), a)).collect();
        let id = match entry {
            Some(id) => id,
            None => match self.agents.first() {
                Some(agent) => agent.id.as_str(),
                None => bail!("no agents configured"),
            },
        };
        self.build_agent(id, &by_id, &mut HashSet::new())
    }

    fn build_agent(
        &self,
        id: &str,
        by_id: &HashMap<&str, &AgentConfig>,
        ancestors: &mut HashSet<String>,
    ) -> Result<AgentDefinition> {
        let Some(config) = by_id.get(id).copied() else {
            bail!("unknown agent '{id}'");
        };
        if !ancestors.insert(id.to_string()) {
            bail!("delegation cycle through agent '{id}'");
        }

        let mut definition = AgentDefinition::new(&config.id, &config.system_prompt);
        definition.variables = config.variables.clone();

        if let Some(dir) = &config.context_dir {
            let root = self.orchestrator.working_dir.join(dir);
            let packed = ContextPacker::default()
                .pack_directory(&root)
                .with_context(|| format!("failed to pack context for '{id}'"))?;
            tracing::debug!(agent = %id, files = packed.file_count(), bytes = packed.total_bytes, "Packed context");
            definition = definition.with_context(packed);
        }

        if !config.delegates.is_empty() {
            let mut children = Vec::with_capacity(config.delegates.len());
            for child in &config.delegates {
                children.push(self.build_agent(child, by_id, ancestors)?);
            }
            definition = definition.with_tool(delegate_tool(children));
        }

        ancestors.remove(id);
        Ok(definition)
    }

    pub fn hook_bus(&self) -> Result<HookBus> {
        let mut bus = HookBus::new();

        if !self.policy.is_empty() {
            let mut policy = ToolPolicyHook::new();
            for rule in &self.policy {
                policy = match &rule.arguments {
                    Some(arguments) => policy.deny_arguments(&rule.tool, arguments, &rule.reason),
                    None => policy.deny(&rule.tool, &rule.reason),
                }
                .with_context(|| format!("invalid policy pattern for '{}'", rule.tool))?;
            }
            bus.on(HookEvent::PreToolUse, policy);
        }

        if self.log_hooks {
            let logging = Arc::new(LoggingHook);
            for event in HookEvent::all() {
                bus.on_arc(*event, logging.clone());
            }
        }

        let commands = self
            .hooks
            .iter()
            .flat_map(|(event, configs)| configs.iter().map(move |c| (event.clone(), c.clone())))
            .collect();
        let attached = bus.load_module(HookModule::Commands(commands))?;
        tracing::debug!(attached, "Loaded command hooks");

        Ok(bus)
    }

    pub fn compactor(&self) -> Option<Arc<dyn TranscriptCompactor>> {
        self.compaction.map(|c| {
            Arc::new(WindowCompactor::new(c.max_messages, c.keep_recent))
                as Arc<dyn TranscriptCompactor>
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
log_hooks = true

[orchestrator]
model = "scripted"
max_iterations = 7

[[agents]]
id = "manager"
system_prompt = "You coordinate {{ team }}."
variables = { team = "writers" }
delegates = ["writer"]

[[agents]]
id = "writer"
system_prompt = "You write."

[[policy]]
tool = "^shell$"
reason = "shell is disabled"

[hooks]
preToolUse = [{ command = "true", matcher = "delegate" }]
bogusEvent = [{ command = "true" }]

[compaction]
max_messages = 30
keep_recent = 10
"#;

    #[test]
    fn parses_full_config() {
        let config = ConductorConfig::parse(CONFIG).unwrap();
        assert_eq!(config.orchestrator.model, "scripted");
        assert_eq!(config.orchestrator.max_iterations, 7);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].variables["team"], "writers");
        assert_eq!(config.hooks["preToolUse"][0].matcher.as_deref(), Some("delegate"));
        assert!(config.compactor().is_some());
    }

    #[test]
    fn entry_agent_gets_delegate_tool() {
        let config = ConductorConfig::parse(CONFIG).unwrap();
        let manager = config.agent(None).unwrap();
        assert_eq!(manager.id, "manager");
        assert_eq!(manager.tools.len(), 1);
        assert_eq!(
            manager.render_system_prompt(&Map::new()).unwrap(),
            "You coordinate writers."
        );

        let writer = config.agent(Some("writer")).unwrap();
        assert!(writer.tools.is_empty());
    }

    #[test]
    fn delegation_cycles_are_rejected() {
        let config = ConductorConfig::parse(
            r#"
[[agents]]
id = "a"
system_prompt = "a"
delegates = ["b"]

[[agents]]
id = "b"
system_prompt = "b"
delegates = ["a"]
"#,
        )
        .unwrap();
        let err = config.agent(Some("a")).unwrap_err();
        assert!(err.to_string().contains("delegation cycle"));
        assert!(config.agent(Some("missing")).is_err());
    }

    #[test]
    fn hook_bus_skips_unknown_events() {
        let config = ConductorConfig::parse(CONFIG).unwrap();
        let bus = config.hook_bus().unwrap();
        // policy + logging + one command hook
        assert_eq!(bus.listener_count(HookEvent::PreToolUse), 3);
        assert_eq!(bus.listener_count(HookEvent::Stop), 1);
    }

    #[test]
    fn load_resolves_working_dir_against_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/guide.md"), "# guide").unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(
            &path,
            r#"
[orchestrator]
working_dir = "."

[[agents]]
id = "reader"
system_prompt = "Read."
context_dir = "docs"
"#,
        )
        .unwrap();

        let config = ConductorConfig::load(&path).unwrap();
        assert_eq!(config.orchestrator.working_dir, dir.path().join("."));
        let reader = config.agent(None).unwrap();
        let context = reader.context.unwrap();
        assert_eq!(context.file_count(), 1);
        assert!(context.rendered.contains("# guide"));
    }

    #[tokio::test]
    async fn demo_config_runs_end_to_end() {
        use conductor_core::{AgentOrchestrator, InvocationOptions, OrchestratorServices, ScriptedProvider};

        let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/delegate");
        let config = ConductorConfig::load(&demo.join("conductor.toml")).unwrap();
        let provider = ScriptedProvider::from_path(&demo.join("script.jsonl")).unwrap();
        let services =
            OrchestratorServices::new(Arc::new(provider)).with_hooks(config.hook_bus().unwrap());
        let orchestrator = AgentOrchestrator::new(services, config.orchestrator.clone());

        let root = orchestrator
            .run_agent(config.agent(None).unwrap(), InvocationOptions::new("Describe rivers"))
            .await
            .unwrap();

        assert!(!root.is_failed());
        assert_eq!(
            root.children()[0].last_assistant_text().as_deref(),
            Some("Rivers carry the hills to the sea.")
        );
        assert!(root
            .last_assistant_text()
            .unwrap()
            .ends_with("Rivers carry the hills to the sea."));
    }
}
