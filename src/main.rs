use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nativex::config::{DEFAULT_CONFIG_PATH, NativexConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "nativex")]
#[command(version, about = "Streams AI-generated app code into per-project sandbox containers")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to the config file (defaults to .nativex/nativex.toml)
    #[arg(long, global = true, env = "NATIVEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and dispatcher workers
    Serve {
        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of dispatcher workers (overrides dispatcher.workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Enable dev mode (bind all interfaces, permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Queue a spawn job for a project
    Enqueue {
        project: String,

        /// Only start the environment and wait for it; skip generation
        #[arg(long)]
        activate: bool,
    },
    /// Show a project's status and URL
    Status { project: String },
    /// Run a saved model response through the artifact parser
    Parse {
        file: PathBuf,

        /// Characters fed to the parser per step
        #[arg(long, default_value = "64")]
        chunk_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = NativexConfig::load_with_env(&config_path)?;

    let _log_guard = nativex::logging::init(
        cli.log_json || config.logging.json,
        cli.verbose,
        config.log_dir(),
    )?;

    match &cli.command {
        Commands::Serve { port, workers, dev } => {
            cmd::cmd_serve(&config, *port, *workers, *dev).await?;
        }
        Commands::Enqueue { project, activate } => {
            cmd::cmd_enqueue(&config, project, *activate).await?;
        }
        Commands::Status { project } => cmd::cmd_status(&config, project).await?,
        Commands::Parse { file, chunk_size } => cmd::cmd_parse(file, *chunk_size)?,
    }

    Ok(())
}
