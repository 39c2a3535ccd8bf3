//! Trainpipe server - HTTP API and management commands for YOLO training.

mod error;
mod handlers;
mod server;

use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trainpipe_core::{InstallSelection, ModelTask, StoragePaths, TrainpipeApi};

#[derive(Parser, Debug)]
#[command(name = "trainpipe")]
#[command(about = "Train and export YOLO detection models")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Data root (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// List base models and whether they are installed
    ListModels {
        /// Only models for this task (detection, classification)
        #[arg(long)]
        task: Option<ModelTask>,
    },
    /// Download base model assets
    InstallModels(InstallArgs),
    /// Deploy helper scripts and create the Python environment
    SetupEnv,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("selection")
        .required(true)
        .args(["all", "detection", "classification", "models"])
))]
struct InstallArgs {
    /// Install all models
    #[arg(long)]
    all: bool,

    /// Install detection models
    #[arg(long)]
    detection: bool,

    /// Install classification models
    #[arg(long)]
    classification: bool,

    /// Install the named models
    #[arg(long, num_args = 1..)]
    models: Vec<String>,
}

impl InstallArgs {
    fn selection(&self) -> InstallSelection {
        if self.detection {
            InstallSelection::Task(ModelTask::Detection)
        } else if self.classification {
            InstallSelection::Task(ModelTask::Classification)
        } else if !self.models.is_empty() {
            InstallSelection::Names(self.models.clone())
        } else {
            InstallSelection::All
        }
    }
}

/// Filter directives: `RUST_LOG` when set, else `debug` or `info`.
fn log_directives(debug: bool, rust_log: Option<String>) -> String {
    rust_log
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let directives = log_directives(cli.debug, std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let data_root = cli.data_dir.unwrap_or_else(StoragePaths::default_root);
    info!("Data root: {}", data_root.display());

    let api = TrainpipeApi::builder(&data_root)
        .auto_create_dirs(true)
        .build()
        .await?;

    match cli.command.unwrap_or(Command::Serve {
        port: 8080,
        host: "127.0.0.1".to_string(),
    }) {
        Command::Serve { port, host } => {
            if !api.environment_ready() {
                info!("Python environment missing; run `trainpipe setup-env` before training");
            }
            let addr = server::start_server(Arc::new(api), &host, port).await?;
            info!("Trainpipe server running on http://{}", addr);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
        }
        Command::ListModels { task } => {
            for model in api.list_base_models(task).await? {
                let state = if model.installed {
                    "installed"
                } else {
                    "not installed"
                };
                println!("{} - {} - {}", model.name, model.task, state);
            }
        }
        Command::InstallModels(args) => {
            let report = api.install_base_models(&args.selection()).await?;
            for name in &report.unknown {
                println!("Model {} not found", name);
            }
            for name in &report.installed {
                println!("Model {} installed", name);
            }
        }
        Command::SetupEnv => {
            api.setup_environment().await?;
            println!("Python environment ready");
        }
    }

    Ok(())
}
