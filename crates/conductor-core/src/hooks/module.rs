//! Hook modules: bundles of listeners attached to a bus before a run

use std::sync::Arc;

use super::bus::{HookBus, HookListener};
use super::command::{CommandHook, CommandHookConfig};
use super::events::HookEvent;

type Registrar = Box<dyn FnOnce(&mut HookBus) -> anyhow::Result<()> + Send>;

/// A loadable set of hooks
pub enum HookModule {
    /// Registers whatever it wants on the bus
    Registrar(Registrar),
    /// Listeners keyed by event name
    Listeners(Vec<(String, Arc<dyn HookListener>)>),
    /// Shell-command listeners keyed by event name
    Commands(Vec<(String, CommandHookConfig)>),
}

impl HookModule {
    pub fn registrar(f: impl FnOnce(&mut HookBus) -> anyhow::Result<()> + Send + 'static) -> Self {
        HookModule::Registrar(Box::new(f))
    }
}

impl HookBus {
    /// Attach a module, returning the number of listeners it contributed
    ///
    /// Entries naming an unknown event are skipped with a warning.
    pub fn load_module(&mut self, module: HookModule) -> anyhow::Result<usize> {
        match module {
            HookModule::Registrar(register) => {
                let before = self.total_listeners();
                register(self)?;
                Ok(self.total_listeners().saturating_sub(before))
            }
            HookModule::Listeners(entries) => {
                let mut attached = 0;
                for (name, listener) in entries {
                    let Some(event) = known_event(&name) else {
                        continue;
                    };
                    self.on_arc(event, listener);
                    attached += 1;
                }
                Ok(attached)
            }
            HookModule::Commands(entries) => {
                let mut attached = 0;
                for (name, config) in entries {
                    let Some(event) = known_event(&name) else {
                        continue;
                    };
                    if config.command.trim().is_empty() {
                        tracing::warn!(event = %event, "Skipping hook with empty command");
                        continue;
                    }
                    self.on(event, CommandHook::from_config(event, &config)?);
                    attached += 1;
                }
                Ok(attached)
            }
        }
    }

    fn total_listeners(&self) -> usize {
        HookEvent::all()
            .iter()
            .map(|e| self.listener_count(*e))
            .sum()
    }
}

fn known_event(name: &str) -> Option<HookEvent> {
    let event = HookEvent::parse(name);
    if event.is_none() {
        tracing::warn!(event = %name, "Skipping hook for unknown event");
    }
    event
}
