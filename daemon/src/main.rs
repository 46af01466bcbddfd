// SPDX-License-Identifier: MIT
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use letad::config::{cache_dir, hover_cache_path, log_dir, Config};
use letad::pidfile::DaemonLock;
use letad::AppContext;

#[derive(Parser)]
#[command(name = "letad", about = "leta daemon — multiplexes LSP servers", version)]
struct Args {
    /// Log to stderr instead of the daemon log file.
    #[arg(long)]
    foreground: bool,

    /// Log filter (overrides config and LETA_LOG).
    #[arg(long, env = "LETA_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load()?;
    let removed = config.cleanup_stale_workspace_roots();

    let filter = args
        .log
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    if args.foreground {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        std::fs::create_dir_all(log_dir())?;
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir().join("daemon.log"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    }

    let _lock = match DaemonLock::acquire() {
        Some(lock) => lock,
        None => {
            info!("another daemon instance is already running, exiting");
            return Ok(());
        }
    };

    if !removed.is_empty() {
        info!(count = removed.len(), "cleaned up stale workspace roots");
    }

    std::fs::create_dir_all(cache_dir())?;

    info!(version = env!("CARGO_PKG_VERSION"), "letad starting");
    let ctx = Arc::new(AppContext::new(config));
    ctx.hovers.load(&hover_cache_path()).await;

    letad::ipc::run(ctx).await
}
