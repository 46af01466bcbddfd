// SPDX-License-Identifier: MIT
//! IPC server: a unix-domain socket speaking u32 length-prefixed JSON
//! frames, one request per connection.
//!
//! Each accepted connection is served by its own task. A client that
//! disconnects before its response is ready cancels the dispatched
//! operation (the select! drops the handler future). Shutdown stops
//! accepting, drains in-flight requests with a deadline, tears down every
//! language server, persists the hover cache, and removes the discovery
//! files.

pub mod handlers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use leta_proto::{ErrorKind, Request, Response, RpcError};

use crate::config::{hover_cache_path, socket_path};
use crate::pidfile;
use crate::AppContext;

use handlers::HandlerContext;

/// Upper bound on a single request/response frame.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

pub async fn run(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let socket = socket_path();
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket.exists() {
        std::fs::remove_file(&socket)?;
    }

    let listener = UnixListener::bind(&socket)?;
    pidfile::write_pid(std::process::id())?;
    info!(socket = %socket.display(), "daemon listening");

    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutdown requested");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                let ctx = Arc::clone(&ctx);
                let in_flight = Arc::clone(&in_flight);
                in_flight.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &ctx).await {
                        debug!(err = %e, "connection error");
                    }
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    }

    // Drain in-flight requests, bounded.
    let drain_start = std::time::Instant::now();
    while in_flight.load(Ordering::SeqCst) > 0 && drain_start.elapsed() < DRAIN_DEADLINE {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let remaining = in_flight.load(Ordering::SeqCst);
    if remaining > 0 {
        warn!(remaining, "abandoning in-flight requests at shutdown");
    }

    ctx.session.close_all().await;
    if let Err(e) = ctx.hovers.save(&hover_cache_path()).await {
        warn!(err = %e, "failed to persist hover cache");
    }
    let _ = std::fs::remove_file(&socket);
    pidfile::remove_pid();
    info!("daemon stopped");
    Ok(())
}

async fn handle_connection(stream: UnixStream, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();

    let frame = read_frame(&mut read_half).await?;
    let request: Request = serde_json::from_slice(&frame)?;
    debug!(op = %request.op, "request");

    let handler_ctx = HandlerContext {
        session: ctx.session.clone(),
        symbols: ctx.symbols.clone(),
        hovers: ctx.hovers.clone(),
    };

    // The client holds its end open while waiting; EOF before the response
    // means it disconnected, which cancels the dispatch.
    let response = tokio::select! {
        response = dispatch(ctx, &handler_ctx, &request.op, request.params) => response,
        _ = wait_for_disconnect(&mut read_half) => {
            debug!(op = %request.op, "client disconnected, request cancelled");
            return Ok(());
        }
    };

    let bytes = serde_json::to_vec(&response)?;
    write_frame(&mut write_half, &bytes).await?;
    write_half.shutdown().await?;
    Ok(())
}

async fn wait_for_disconnect(read_half: &mut tokio::net::unix::OwnedReadHalf) {
    let mut buf = [0u8; 1];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {} // stray bytes; keep draining
        }
    }
}

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> std::io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn dispatch(
    ctx: &Arc<AppContext>,
    handler_ctx: &HandlerContext,
    op: &str,
    params: serde_json::Value,
) -> Response {
    macro_rules! handle {
        ($params_ty:ty, $handler:path) => {{
            match serde_json::from_value::<$params_ty>(params) {
                Ok(parsed) => match $handler(handler_ctx, parsed).await {
                    Ok(result) => Response::ok(&result),
                    Err(e) => Response::err(e),
                },
                Err(e) => Response::err(RpcError::new(
                    ErrorKind::UsageError,
                    format!("invalid params for '{op}': {e}"),
                )),
            }
        }};
    }

    use leta_proto as proto;

    match op {
        "grep" => handle!(proto::GrepParams, handlers::handle_grep),
        "files" => handle!(proto::FilesParams, handlers::handle_files),
        "show" => handle!(proto::ShowParams, handlers::handle_show),
        "references" => handle!(proto::LocationsParams, handlers::handle_references),
        "declaration" => handle!(proto::LocationsParams, handlers::handle_declaration),
        "implementations" => handle!(proto::LocationsParams, handlers::handle_implementations),
        "subtypes" => handle!(proto::LocationsParams, handlers::handle_subtypes),
        "supertypes" => handle!(proto::LocationsParams, handlers::handle_supertypes),
        "calls" => handle!(proto::CallsParams, handlers::handle_calls),
        "rename" => handle!(proto::RenameParams, handlers::handle_rename),
        "move-file" => handle!(proto::MoveFileParams, handlers::handle_move_file),
        "format" => handle!(proto::FormatParams, handlers::handle_format),
        "organize-imports" => handle!(proto::FormatParams, handlers::handle_organize_imports),
        "diagnostics" => handle!(proto::DiagnosticsParams, handlers::handle_diagnostics),
        "replace-function" => handle!(proto::ReplaceFunctionParams, handlers::handle_replace_function),
        "resolve-symbol" => handle!(proto::ResolveParams, handlers::handle_resolve_symbol),
        "add-workspace" => handle!(proto::WorkspaceParams, handlers::handle_add_workspace),
        "remove-workspace" => handle!(proto::WorkspaceParams, handlers::handle_remove_workspace),
        "restart-workspace" => handle!(proto::WorkspaceParams, handlers::handle_restart_workspace),
        "describe-session" => {
            match handlers::handle_describe_session(handler_ctx, params).await {
                Ok(result) => Response::ok(&result),
                Err(e) => Response::err(e),
            }
        }
        "shutdown" => {
            let _ = ctx.shutdown_tx.send(());
            Response::ok(&proto::ShutdownResult {
                status: "shutting_down".to_string(),
            })
        }
        unknown => Response::err(RpcError::new(
            ErrorKind::UsageError,
            format!("unknown operation: {unknown}"),
        )),
    }
}
