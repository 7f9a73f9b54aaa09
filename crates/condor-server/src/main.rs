use clap::Parser;
use condor_core::WorkerPool;
use condor_remote::HttpSession;
use condor_server::{AppState, ServerConfig, ServerError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "condor-server", about = "Conda package channel server")]
struct Cli {
    /// Configuration file; defaults are used when it does not exist.
    #[arg(long, default_value = "condor.toml")]
    config: PathBuf,

    /// Port to listen on, overriding `server.bind`.
    #[arg(long)]
    port: Option<u16>,

    /// Directory for channel data, overriding `server.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Background download workers, overriding `server.workers`.
    #[arg(long)]
    workers: Option<usize>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ServerError> {
    let mut config = ServerConfig::load_or_default(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.bind = format!("0.0.0.0:{port}");
    }
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }
    if let Some(workers) = cli.workers {
        config.server.workers = workers;
    }

    let addr = config.server.bind.clone();
    info!("starting condor-server on {addr}");
    info!("data directory: {}", config.server.data_dir.display());

    let queue = Arc::new(WorkerPool::new(config.server.workers));
    info!("{} download workers", queue.worker_count());
    let session = Arc::new(HttpSession::new(config.remote.clone()));
    let state = Arc::new(AppState::open(config, queue, session)?);
    condor_server::run_server(&state, &addr)
}
