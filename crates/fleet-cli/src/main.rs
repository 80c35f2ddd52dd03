mod config;
mod console;
mod fleet;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use fleet_protocol::{
    spawn_coordinator, BackupMode, FinalizeReason, FleetProtocolError, Orchestrator,
    OrchestratorConfig, OutputSink, SessionId, Summary, TeeSink, TokioScheduler, TracingSink,
};
use tokio::sync::broadcast;

use config::FileConfig;
use console::{ChannelSink, ConsoleSink};
use fleet::{FleetPlan, SimulatedFleet};

#[derive(Parser)]
#[command(name = "fleet-backup", about = "Run a network backup across a simulated fleet")]
struct Cli {
    /// JSON file with timing overrides (default: $FLEET_BACKUP_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write session lines to the log (see RUST_LOG).
    #[arg(long, global = true)]
    log_lines: bool,

    #[command(flatten)]
    fleet: FleetArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct FleetArgs {
    /// Comma-separated node names.
    #[arg(long, value_delimiter = ',', default_value = "alpha,beta,gamma", global = true)]
    nodes: Vec<String>,

    /// Nodes whose backup fails.
    #[arg(long, value_delimiter = ',', global = true)]
    fail: Vec<String>,

    /// Nodes that never answer.
    #[arg(long, value_delimiter = ',', global = true)]
    silent: Vec<String>,

    /// Nodes that are listed but gone by the time a request is sent.
    #[arg(long, value_delimiter = ',', global = true)]
    missing: Vec<String>,

    /// Nodes without a backup subsystem.
    #[arg(long, value_delimiter = ',', global = true)]
    unavailable: Vec<String>,

    /// Mean simulated backup duration in ms.
    #[arg(long, default_value = "1500", global = true)]
    backup_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Back up every node.
    All {
        /// Send to every node at once instead of one by one.
        #[arg(long)]
        parallel: bool,
        /// Backup kind passed to the nodes.
        #[arg(long, default_value = "full")]
        kind: String,
    },

    /// Back up a single node.
    One {
        node: String,
        /// Backup kind passed to the node.
        #[arg(long, default_value = "full")]
        kind: String,
    },

    /// Ask a node for its local backup status.
    Probe { node: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FileConfig::resolve(cli.config.as_deref())?.apply(OrchestratorConfig::default());
    tracing::debug!(?config, "effective timing");

    let plan = FleetPlan {
        nodes: cli.fleet.nodes,
        fail: cli.fleet.fail,
        silent: cli.fleet.silent,
        missing: cli.fleet.missing,
        unavailable: cli.fleet.unavailable,
        backup_ms: cli.fleet.backup_ms,
    };
    let fleet = SimulatedFleet::start(&plan)?;
    let orch = Orchestrator::new(
        Arc::new(fleet.net.clone()),
        Arc::new(TokioScheduler::current()?),
        config,
    );
    spawn_coordinator(orch.clone(), fleet.coordinator_rx);

    let console: Arc<dyn OutputSink> = if cli.log_lines {
        Arc::new(TeeSink::new(Arc::new(ConsoleSink), Arc::new(TracingSink)))
    } else {
        Arc::new(ConsoleSink)
    };
    let mut summaries = orch.subscribe();

    match cli.command {
        Command::All { parallel, kind } => {
            let mode = if parallel {
                BackupMode::Parallel
            } else {
                BackupMode::Sequential
            };
            let id = orch.start_all(console, mode, &kind)?;
            wait_for_summary(&orch, &mut summaries, &id).await?;
        }

        Command::One { node, kind } => match orch.start_one(console, &node, &kind) {
            Ok(id) => {
                wait_for_summary(&orch, &mut summaries, &id).await?;
            }
            // Already reported and summarized.
            Err(FleetProtocolError::UnknownNode { .. }) => {}
            Err(e) => return Err(e.into()),
        },

        Command::Probe { node } => {
            let (watch, mut lines) = ChannelSink::new();
            let sink = Arc::new(TeeSink::new(console, Arc::new(watch)));
            match orch.probe_status(sink, &node) {
                // The probe prints exactly one line: the answer or its expiry.
                Ok(_) => {
                    lines.recv().await;
                }
                Err(FleetProtocolError::UnknownNode { .. } | FleetProtocolError::Unreachable { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    println!();
    println!("{}", serde_json::to_string_pretty(orch.metrics())?);
    Ok(())
}

/// Wait until `id` is summarized. Ctrl+C closes the session early with
/// whatever results it has.
async fn wait_for_summary(
    orch: &Orchestrator,
    summaries: &mut broadcast::Receiver<Summary>,
    id: &SessionId,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            summary = summaries.recv() => match summary {
                Ok(summary) if &summary.session_id == id => return Ok(()),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "summary feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("orchestrator stopped before session {id} finished");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCtrl+C received, closing session {id}...");
                orch.finalize(id, FinalizeReason::Timeout);
                return Ok(());
            }
        }
    }
}
