//! runnerscaled: the runnerscale daemon.
//!
//! Runs the autoscaler controller against an embedded redb store, and
//! offers a few operator commands that edit the same store.
//!
//! # Usage
//!
//! ```text
//! runnerscaled --config /etc/runnerscale.toml run
//! runnerscaled apply --file manifest.json
//! runnerscaled reserve ci/hra --replicas 5 --duration 2h
//! runnerscaled demand ci/runners --queued 4 --in-progress 2
//! runnerscaled status ci/hra
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod manifest;

#[derive(Parser)]
#[command(
    name = "runnerscaled",
    about = "runnerscale autoscaler daemon",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to runnerscale.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller loop until Ctrl-C.
    Run {
        /// Reconcile interval, e.g. "30s" (overrides the config file).
        #[arg(long)]
        sync_interval: Option<String>,
    },
    /// Create or update autoscalers and deployments from a JSON manifest.
    Apply {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Reserve extra capacity on an autoscaler for a while.
    Reserve {
        /// Autoscaler as namespace/name.
        autoscaler: String,
        #[arg(long)]
        replicas: u32,
        /// How long the reservation lasts, e.g. "1h".
        #[arg(long)]
        duration: String,
    },
    /// Record a demand snapshot for a runner deployment.
    Demand {
        /// Deployment as namespace/name.
        deployment: String,
        #[arg(long, default_value = "0")]
        queued: u32,
        #[arg(long, default_value = "0")]
        in_progress: u32,
        #[arg(long, default_value = "0")]
        busy: u32,
        #[arg(long, default_value = "0")]
        registered: u32,
    },
    /// Print an autoscaler and its recent events.
    Status {
        /// Autoscaler as namespace/name.
        autoscaler: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,runnerscaled=debug,runnerscale=debug")
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data_dir());

    match cli.command {
        Command::Run { sync_interval } => {
            commands::run::run(&config, &data_dir, sync_interval.as_deref()).await
        }
        Command::Apply { file } => {
            let state = commands::open_store(&data_dir)?;
            commands::apply::apply(&state, &file)
        }
        Command::Reserve {
            autoscaler,
            replicas,
            duration,
        } => {
            let state = commands::open_store(&data_dir)?;
            commands::resource::reserve(
                &state,
                &autoscaler,
                replicas,
                &duration,
                runnerscale_autoscale::epoch_secs(),
            )
        }
        Command::Demand {
            deployment,
            queued,
            in_progress,
            busy,
            registered,
        } => {
            let state = commands::open_store(&data_dir)?;
            commands::resource::demand(
                &state,
                &deployment,
                commands::resource::DemandCounts {
                    queued,
                    in_progress,
                    busy,
                    registered,
                },
                runnerscale_autoscale::epoch_secs(),
            )
        }
        Command::Status { autoscaler } => {
            let state = commands::open_store(&data_dir)?;
            commands::resource::status(&state, &autoscaler)
        }
    }
}
