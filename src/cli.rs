//! `kestrel` CLI — a thin consumer of the Agent Loop.
//!
//! Wires together config loading, `tracing-subscriber` installation, and
//! either a one-shot REPL-style run against the configured engine or the
//! HTTP + WebSocket gateway daemon. Onboarding, banners, and tunnelling are
//! out of scope here; this binary only assembles the pieces the library
//! exposes.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kestrel_core::agent::{AgentConfig, AgentLoop, SessionManager};
use kestrel_core::config::AppConfig;
use kestrel_core::engine::openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleEngine};
use kestrel_core::engine::Engine;
use kestrel_core::gateway::{start_gateway, GatewayStateInner};
use kestrel_core::memory::{InMemoryStore, Memory};
use kestrel_core::pairing::PairingManager;
use kestrel_core::security::{AutonomyLevel, SecurityPolicy};
use kestrel_core::tools::{register_builtin_tools, ToolRegistry};
use kestrel_core::types::{AgentEvent, Message};
use kestrel_core::workers::{WorkerPool, WorkerPoolConfig};

#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    about = "Personal AI-assistant agent core",
    version,
    long_about = "Run without a subcommand to enter the interactive REPL.\n\
                  Run `kestrel daemon` to start the HTTP + WebSocket gateway."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output raw text without formatting.
    #[arg(long, global = true)]
    raw: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP + WebSocket gateway and block until it shuts down.
    Daemon,
    /// Send a single message to the agent and print its final answer.
    Run {
        /// The message to send.
        message: String,
    },
}

fn autonomy_from_str(s: &str) -> AutonomyLevel {
    match s {
        "readonly" | "read_only" => AutonomyLevel::ReadOnly,
        "full" => AutonomyLevel::Full,
        _ => AutonomyLevel::Supervised,
    }
}

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Assemble the pieces a single session needs, wired from `config`.
fn build_agent_loop(config: &AppConfig, memory: Arc<dyn Memory>) -> Arc<AgentLoop> {
    let policy = Arc::new(SecurityPolicy::new(
        autonomy_from_str(&config.security.autonomy_level),
        config.security.workspace_root.clone().map(Into::into),
        config.security.blocked_commands.iter().map(Into::into).collect(),
        config.security.window_secs,
        config.security.max_actions_per_window,
    ));

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, policy.clone(), memory.clone());

    let worker_pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
        max_workers: config.worker_pool.max_workers,
        task_timeout: std::time::Duration::from_secs(config.worker_pool.task_timeout_secs),
    }));

    let engine_config = OpenAICompatibleConfig::new(
        std::env::var("KESTREL_API_KEY").unwrap_or_default(),
        std::env::var("KESTREL_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
    )
    .default_model(config.provider.default_model.clone())
    .timeout(std::time::Duration::from_secs(config.provider.request_timeout_secs))
    .max_retries(config.provider.max_retries);

    let engine: Arc<dyn Engine> = Arc::new(
        OpenAICompatibleEngine::new(engine_config, config.provider.default_id.clone())
            .expect("engine construction should not fail before any request is sent"),
    );

    let agent_config = AgentConfig {
        model: config.provider.default_model.clone(),
        temperature: Some(config.agent.temperature),
        max_tokens: Some(config.agent.max_tokens),
        max_iterations: config.agent.max_iterations,
        max_retries: config.agent.max_retries,
        system_prompt: String::new(),
    };

    let mut agent_loop = AgentLoop::new(engine, Arc::new(registry), worker_pool, policy, agent_config);
    if config.memory.enabled {
        agent_loop = agent_loop.with_memory(memory);
    }
    Arc::new(agent_loop)
}

async fn print_run(agent: Arc<AgentLoop>, message: String, raw: bool) {
    use futures::StreamExt;

    let mut stream = agent.run(Message::user(message));
    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::Thinking { delta } if !raw => eprint!("{delta}"),
            AgentEvent::Text { delta, .. } => print!("{delta}"),
            AgentEvent::ToolStart { tool, .. } if !raw => eprintln!("\n[tool] {tool} ..."),
            AgentEvent::ToolEnd { tool, result, .. } if !raw => {
                eprintln!("[tool] {tool} -> {}", if result.success { "ok" } else { "error" });
            }
            AgentEvent::ToolValidationError { tool, errors } => {
                eprintln!("[tool] {tool} rejected: {}", errors.join(", "));
            }
            AgentEvent::Complete { answer, .. } => {
                if raw {
                    println!("{answer}");
                } else {
                    println!("\n{answer}");
                }
            }
            AgentEvent::Error { message } => eprintln!("error: {message}"),
            AgentEvent::Aborted { reason } => eprintln!("aborted: {reason}"),
            _ => {}
        }
    }
}

async fn run_repl(config: AppConfig, raw: bool) {
    let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new());
    let stdin = io::stdin();
    if stdin.is_terminal() && !raw {
        println!("kestrel agent core — type a message, Ctrl-D to exit.");
    }
    let mut lines = stdin.lock().lines();
    loop {
        if stdin.is_terminal() && !raw {
            print!("> ");
            let _ = io::stdout().flush();
        }
        let Some(Ok(line)) = lines.next() else { break };
        if line.trim().is_empty() {
            continue;
        }
        let agent = build_agent_loop(&config, memory.clone());
        print_run(agent, line, raw).await;
    }
}

async fn run_daemon(config: AppConfig) {
    let sessions = Arc::new(SessionManager::new());
    let pairing = if config.pairing.enabled {
        Some(Arc::new(PairingManager::with_ttls(
            config.pairing.code_ttl_minutes,
            config.pairing.token_ttl_days,
        )))
    } else {
        None
    };
    let state = Arc::new(GatewayStateInner {
        sessions,
        pairing,
        agent_card: None,
        webhooks: config.gateway.webhooks.clone(),
    });

    if let Err(e) = start_gateway(state).await {
        eprintln!("gateway error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    install_tracing();
    let config = kestrel_core::config::load_default_config();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Daemon) => run_daemon(config).await,
        Some(Commands::Run { message }) => {
            let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new());
            let agent = build_agent_loop(&config, memory);
            print_run(agent, message, cli.raw).await;
        }
        None => run_repl(config, cli.raw).await,
    }
}
