//! Conductor - run agent graphs from the command line
//!
//! Replays scripted provider turns through the orchestrator so agent
//! configurations, hooks and policies can be exercised without a model.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use conductor_core::{
    collect_invocations, AgentInvocation, AgentOrchestrator, HookEvent, InvocationOptions,
    LoopEvent, OrchestratorServices, ScriptedProvider,
};

mod config;

use config::ConductorConfig;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Agent orchestration runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent against a scripted provider
    ///
    /// The script is JSON Lines: each line is an array of stream events
    /// answering one model call, consumed in order across all agents.
    Run {
        /// Path to conductor.toml
        #[arg(short, long, default_value = "conductor.toml")]
        config: PathBuf,

        /// Scripted provider turns
        #[arg(short, long)]
        script: PathBuf,

        /// User prompt for the entry agent
        #[arg(short, long)]
        prompt: String,

        /// Entry agent id (defaults to the first configured agent)
        #[arg(short, long)]
        agent: Option<String>,

        /// Write a JSONL trace here (overrides the config)
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Append to the trace file instead of truncating it
        #[arg(long)]
        append_trace: bool,

        /// Print loop events as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// List hook event names
    Events,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries agent output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            script,
            prompt,
            agent,
            trace,
            append_trace,
            json,
        } => {
            let mut config = ConductorConfig::load(&config)?;
            if let Some(path) = trace {
                config.orchestrator.trace_path = Some(path);
            }
            config.orchestrator.trace_append |= append_trace;
            run(config, script, prompt, agent, json).await
        }
        Commands::Events => {
            for event in HookEvent::all() {
                let kind = if event.must_succeed() {
                    "must-succeed"
                } else {
                    "best-effort"
                };
                println!("{:<20} {}", event.as_str(), kind);
            }
            Ok(())
        }
    }
}

async fn run(
    config: ConductorConfig,
    script: PathBuf,
    prompt: String,
    agent: Option<String>,
    json: bool,
) -> Result<()> {
    let provider = ScriptedProvider::from_path(&script)?;
    let definition = config.agent(agent.as_deref())?;
    tracing::info!(agent = %definition.id, script = %script.display(), "Starting run");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut services = OrchestratorServices::new(Arc::new(provider))
        .with_hooks(config.hook_bus()?)
        .with_event_sender(tx);
    if let Some(compactor) = config.compactor() {
        services = services.with_compactor(compactor);
    }

    let orchestrator = AgentOrchestrator::new(services, config.orchestrator);
    let run = orchestrator.run_agent(definition, InvocationOptions::new(prompt));
    tokio::pin!(run);

    let mut stdout = std::io::stdout();
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(event) = rx.recv() => print_event(&mut stdout, event, json)?,
        }
    };
    while let Ok(event) = rx.try_recv() {
        print_event(&mut stdout, event, json)?;
    }

    let root = outcome?;
    print_summary(&root);
    if root.is_failed() {
        bail!("agent '{}' failed", root.id());
    }
    Ok(())
}

fn print_event(out: &mut impl Write, event: LoopEvent, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        return Ok(());
    }
    match event {
        LoopEvent::TextDelta { delta, .. } => write!(out, "{delta}")?,
        LoopEvent::TurnComplete { .. } => writeln!(out)?,
        LoopEvent::ToolCall { agent, name, .. } => writeln!(out, "[{agent}] -> {name}")?,
        LoopEvent::ToolBlocked {
            agent, name, reason, ..
        } => writeln!(out, "[{agent}] x {name}: {reason}")?,
        LoopEvent::Error { agent, error } => writeln!(out, "[{agent}] error: {error}")?,
        _ => {}
    }
    out.flush()?;
    Ok(())
}

fn print_summary(root: &Arc<AgentInvocation>) {
    println!();
    for inv in collect_invocations(root) {
        let indent = "  ".repeat(inv.depth());
        match inv.error() {
            Some(err) => println!("{indent}{} ({}): {}", inv.id(), err.name, err.message),
            None => println!(
                "{indent}{} ({}, {} iterations)",
                inv.id(),
                inv.state(),
                inv.iterations()
            ),
        }
    }
}
