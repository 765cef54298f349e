//! review-watch: Headless observer for a spec's task list.
//!
//! Connects to the review dashboard's push channel and logs a one-line
//! summary of the reconciled task state every time it changes.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use review_core::PushChannel;
use review_watch::{PushClient, SpecObserver, WatchConfig};

#[derive(Parser, Debug)]
#[command(name = "review-watch")]
#[command(about = "Follow a spec's task list over the dashboard push channel")]
struct Args {
    /// WebSocket URL of the push channel (e.g. ws://localhost:5000/ws)
    #[arg(short, long)]
    url: Option<String>,

    /// Name of the spec to follow
    #[arg(short, long)]
    spec: Option<String>,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,review_watch=debug"
    } else {
        "info,review_watch=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config =
        WatchConfig::load_or_default(args.config.as_deref())?.resolve(args.url, args.spec)?;

    info!("Starting review-watch");
    info!("Push channel: {}", config.url);
    info!("Spec: {}", config.spec);

    let channel = Arc::new(PushChannel::new());
    let observer = Arc::new(SpecObserver::new(&config.spec));
    let _subscription = observer.attach(&channel);

    let client = PushClient::new(config.url, Arc::clone(&channel), config.reconnect);

    info!("Watching. Press Ctrl+C to stop.");

    tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!(
        "Shutting down after {} change(s); last state {}",
        observer.changes(),
        observer.state().summary()
    );
    Ok(())
}
