//! `throttled-dl` server binary.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use throttled_dl::{Config, DownloadService};

#[derive(Parser, Debug)]
#[command(name = "throttled-dl")]
#[command(
    author,
    version,
    about = "Serve files in chunks, throttled by a shared bandwidth budget"
)]
struct Args {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Directory to serve files from, overriding the configuration
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Aggregate bandwidth limit in bytes per second, overriding the configuration
    #[arg(long)]
    limit_bps: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn load_config(&self) -> throttled_dl::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(root) = &self.root {
            config.files.root_dir = root.clone();
        }
        if let Some(limit) = self.limit_bps {
            config.throttle.limit_bps = Some(limit);
        }
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let service = match DownloadService::new(config).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start download service");
            return ExitCode::FAILURE;
        }
    };

    match throttled_dl::run_with_shutdown(service).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped with an error");
            ExitCode::FAILURE
        }
    }
}
