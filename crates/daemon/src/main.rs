use std::path::PathBuf;

use clap::Parser;
use url::Url;

use torus_daemon::{process, Config, Daemon};

#[derive(Parser, Debug)]
#[command(name = "torusd")]
#[command(about = "Torus daemon: session secrets, crypto, and the registry proxy")]
struct Args {
    /// Path to the torus root directory (defaults to ~/.torus)
    #[arg(long)]
    torus_root: Option<PathBuf>,

    /// Registry URI override
    #[arg(long)]
    registry: Option<Url>,

    /// Open the daemon socket to the owning group (mode 0640)
    #[arg(long)]
    group_shared: bool,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(
        args.torus_root,
        args.registry,
        args.group_shared,
        args.log_level,
        args.log_dir,
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let _guards = process::init_logging(&config);

    let daemon = match Daemon::new(&config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!("failed to start daemon: {e}");
            std::process::exit(2);
        }
    };

    let (blocker, _shutdown_tx, shutdown_rx) = process::graceful_shutdown_blocker();

    if let Err(e) = daemon.run(shutdown_rx).await {
        tracing::error!("daemon exited with error: {e}");
        std::process::exit(3);
    }

    blocker.abort();
}
