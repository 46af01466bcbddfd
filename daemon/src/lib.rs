// SPDX-License-Identifier: MIT
//! letad — the leta daemon.
//!
//! Multiplexes language server subprocesses across workspaces and exposes
//! semantic code-navigation operations to short-lived CLI clients over a
//! local unix socket.

pub mod cache;
pub mod config;
pub mod index;
pub mod ipc;
pub mod lsp;
pub mod pidfile;
pub mod resolve;
pub mod servers;
pub mod session;
pub mod text;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use cache::HoverCache;
use index::SymbolIndex;
use session::Session;

/// Shared daemon state, assembled once at startup and passed explicitly to
/// every component.
pub struct AppContext {
    pub session: Arc<Session>,
    pub symbols: Arc<SymbolIndex>,
    pub hovers: Arc<HoverCache>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(config: config::Config) -> Self {
        let symbols = Arc::new(SymbolIndex::new(config.daemon.symbol_cache_bytes));
        let hovers = Arc::new(HoverCache::new(config.daemon.hover_cache_bytes));
        let session = Arc::new(Session::new(config));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            session,
            symbols,
            hovers,
            shutdown_tx,
            started_at: Instant::now(),
        }
    }
}
