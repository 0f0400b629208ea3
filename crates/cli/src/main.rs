//! `stepline` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: start the orchestrator and its HTTP control plane.
//! - `migrate`: run pending database migrations.
//! - `validate`: check node and workflow definition files.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use db::{MemoryStore, PgStore, TaskStore};
use engine::{ExecutorConfig, NodeRegistry, Orchestrator, OrchestratorSettings};
use nodes::NodeFactory;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stepline",
    about = "Resumable workflow execution engine",
    version
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the orchestrator and the control-plane server.
    Serve(ServeArgs),
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate node and workflow definition files without starting anything.
    Validate {
        #[arg(long, env = "STEPLINE_NODES", default_value = "./config/nodes.json")]
        nodes: PathBuf,
        #[arg(long, env = "STEPLINE_WORKFLOWS", default_value = "./config/workflows.json")]
        workflows: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "STEPLINE_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    #[arg(long, env = "STEPLINE_NODES", default_value = "./config/nodes.json")]
    nodes: PathBuf,

    #[arg(long, env = "STEPLINE_WORKFLOWS", default_value = "./config/workflows.json")]
    workflows: PathBuf,

    /// Postgres connection string. Without it tasks live in memory only.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "STEPLINE_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    /// Skip every node call (dry run of the workflow wiring).
    #[arg(long, env = "STEPLINE_EMULATE")]
    emulate: bool,

    /// Attempts to acquire a busy node before a task fails.
    #[arg(long, default_value_t = 5)]
    acquire_attempts: u32,

    #[arg(long, default_value_t = 200)]
    acquire_base_delay_ms: u64,

    /// Seconds between reachability probes; 0 disables probing.
    #[arg(long, default_value_t = 30)]
    probe_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Migrate { database_url } => migrate(&database_url).await,
        Command::Validate { nodes, workflows } => validate(nodes, workflows),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store: Arc<dyn TaskStore> = match &args.database_url {
        Some(url) => {
            let pool = db::pool::create_pool(url, args.max_connections)
                .await
                .context("failed to connect to database")?;
            info!("using Postgres task store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("no DATABASE_URL: tasks will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let settings = OrchestratorSettings {
        nodes_path: args.nodes,
        workflows_path: args.workflows,
        emulate: args.emulate,
        executor: ExecutorConfig {
            acquire_attempts: args.acquire_attempts,
            acquire_base_delay: Duration::from_millis(args.acquire_base_delay_ms),
            ..ExecutorConfig::default()
        },
        probe_interval: Duration::from_secs(args.probe_interval_secs),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        settings,
        store,
        NodeFactory::with_builtins(),
    ));

    // The control plane stays up after a failed start; POST /orchestrator/start retries.
    if let Err(err) = orchestrator.start().await {
        error!(error = %err, "orchestrator did not start");
    }

    let state = api::AppState {
        orchestrator: Arc::clone(&orchestrator),
    };
    api::serve(args.bind, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
        }
    })
    .await
    .context("control plane failed")?;

    info!("shutting down");
    match orchestrator.stop().await {
        Ok(()) | Err(engine::EngineError::AlreadyStopped) => Ok(()),
        Err(err) => Err(err).context("orchestrator did not stop cleanly"),
    }
}

async fn migrate(database_url: &str) -> Result<()> {
    info!("running migrations");
    let pool = db::pool::create_pool(database_url, 2)
        .await
        .context("failed to connect to database")?;
    db::pool::run_migrations(&pool)
        .await
        .context("migration failed")?;
    info!("migrations applied successfully");
    Ok(())
}

fn validate(nodes_path: PathBuf, workflows_path: PathBuf) -> Result<()> {
    let nodes = engine::config::load_node_specs(&nodes_path)?;
    let workflows = engine::config::load_workflow_specs(&workflows_path)?;

    let registry = NodeRegistry::from_specs(
        &nodes,
        &NodeFactory::with_builtins(),
        Arc::new(MemoryStore::new()),
    )
    .with_context(|| format!("invalid node configuration in {}", nodes_path.display()))?;
    let workflows = engine::validate::build_workflows(&workflows, &registry.ids())
        .with_context(|| format!("invalid workflow configuration in {}", workflows_path.display()))?;

    println!("{} node(s) OK", nodes.len());
    for workflow in &workflows {
        let route: Vec<&str> = workflow.steps.iter().map(|s| s.node_id.as_str()).collect();
        println!("workflow {} '{}': {}", workflow.id, workflow.name, route.join(" -> "));
    }
    Ok(())
}
