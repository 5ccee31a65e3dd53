//! filesync: keep two directory trees in sync over a WebSocket.
//!
//! One side serves (responder), the other connects (initiator) and drives
//! a sync cycle every few seconds.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filesync_daemon::config::{DEFAULT_CYCLE, DEFAULT_PATH, endpoint_path, endpoint_url};
use filesync_daemon::{Endpoint, NativeFs, SyncConfig, SyncServer, run_client};

#[derive(Parser, Debug)]
#[command(name = "filesync")]
#[command(about = "Bidirectional directory sync over WebSocket")]
struct Args {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and sync with each peer that presents the token
    Serve {
        /// Directory to keep in sync
        #[arg(short, long)]
        root: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "localhost:8088")]
        listen: String,

        /// Shared secret peers must present
        #[arg(short, long)]
        token: String,

        /// WebSocket endpoint path
        #[arg(long, default_value = DEFAULT_PATH)]
        path: String,
    },

    /// Connect to a server and sync on a timer
    Connect {
        /// Directory to keep in sync
        #[arg(short, long)]
        root: PathBuf,

        /// Server address (host:port)
        #[arg(short, long, default_value = "localhost:8088")]
        addr: String,

        /// Shared secret to present
        #[arg(short, long)]
        token: String,

        /// Seconds between sync cycles
        #[arg(short, long, default_value_t = 3)]
        cycle: u64,

        /// WebSocket endpoint path
        #[arg(long, default_value = DEFAULT_PATH)]
        path: String,
    },
}

impl Command {
    fn into_config(self) -> Result<SyncConfig> {
        let config = match self {
            Command::Serve {
                root,
                listen,
                token,
                path,
            } => SyncConfig::new(
                root,
                &token,
                DEFAULT_CYCLE,
                Endpoint::Listen {
                    addr: listen,
                    path: endpoint_path(&path),
                },
            )?,
            Command::Connect {
                root,
                addr,
                token,
                cycle,
                path,
            } => SyncConfig::new(
                root,
                &token,
                Duration::from_secs(cycle),
                Endpoint::Connect {
                    url: endpoint_url(&addr, &path),
                },
            )?,
        };
        Ok(config)
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler: run until the session ends on its own
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,filesync_daemon=debug"
    } else {
        "info,filesync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.command.into_config()?;
    info!("Sync root: {:?}", config.root);

    let fs = NativeFs::new(config.root.clone());
    let session = config.session_config();

    match config.endpoint {
        Endpoint::Listen { addr, path } => {
            let listener = SyncServer::<NativeFs>::bind(&addr).await?;
            info!("Accepting sessions on path {}", path);
            SyncServer::new(fs, session, path)
                .serve(listener, shutdown_signal())
                .await?;
        }
        Endpoint::Connect { url } => {
            let end = run_client(&url, fs, session, shutdown_signal()).await?;
            info!("Session ended: {:?}", end);
        }
    }

    info!("filesync stopped");
    Ok(())
}
