// SPDX-License-Identifier: MIT
//! Language Server Protocol plumbing: framing, capability negotiation, and
//! the per-subprocess async client.

pub mod capabilities;
pub mod client;
pub mod transport;

pub use client::{LspClient, ServerNotification};
pub use transport::FrameError;

use thiserror::Error;

/// Failures surfaced by the LSP layer. Handlers convert these into the
/// user-visible taxonomy; nothing here ever panics on server misbehavior.
#[derive(Error, Debug)]
pub enum LspError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request '{method}' timed out after {seconds}s")]
    TimedOut { method: String, seconds: u64 },
    #[error("language server exited during the request")]
    ServerDead,
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("{capability} is not supported by {server}")]
    NotSupported { capability: String, server: String },
    #[error("failed to spawn '{server}': {message}")]
    Spawn { server: String, message: String },
    #[error("workspace was restarted while the request was in flight")]
    Restarted,
}
