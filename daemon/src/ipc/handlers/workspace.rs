// SPDX-License-Identifier: MIT
//! Workspace management and daemon introspection: `workspace add/remove/
//! restart` and `describe-session`.

use std::path::PathBuf;

use tracing::info;

use leta_proto::{
    AddWorkspaceResult, DescribeResult, RemoveWorkspaceResult, RestartWorkspaceResult, RpcError,
    WorkspaceInfo, WorkspaceParams,
};

use crate::config::Config;
use crate::index::collect_workspace;

use super::{io_error, HandlerContext};

pub async fn handle_add_workspace(
    ctx: &HandlerContext,
    params: WorkspaceParams,
) -> Result<AddWorkspaceResult, RpcError> {
    let root = PathBuf::from(&params.workspace_root)
        .canonicalize()
        .map_err(io_error)?;
    let root_str = root.to_string_lossy().to_string();

    let added = Config::add_workspace_root(&root).map_err(io_error)?;
    if !added {
        return Ok(AddWorkspaceResult {
            added: false,
            workspace_root: root_str,
            message: "workspace already added".to_string(),
        });
    }

    // Pick up the new root immediately.
    if let Ok(config) = Config::load() {
        ctx.session.reload_config(config).await;
    }
    info!(root = %root.display(), "workspace added");

    // Warm the symbol index in the background so the first grep is fast.
    let session = ctx.session.clone();
    let symbols = ctx.symbols.clone();
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        match collect_workspace(&session, &symbols, &root).await {
            Ok((files, failed)) => info!(
                files = files.len(),
                failed = failed.len(),
                elapsed = ?started.elapsed(),
                "background indexing complete"
            ),
            Err(e) => info!(err = %e, "background indexing aborted"),
        }
    });

    Ok(AddWorkspaceResult {
        added: true,
        workspace_root: root_str,
        message: "workspace added, indexing started in background".to_string(),
    })
}

pub async fn handle_remove_workspace(
    ctx: &HandlerContext,
    params: WorkspaceParams,
) -> Result<RemoveWorkspaceResult, RpcError> {
    let root = PathBuf::from(&params.workspace_root);
    let root = root.canonicalize().unwrap_or(root);

    Config::remove_workspace_root(&root).map_err(io_error)?;
    if let Ok(config) = Config::load() {
        ctx.session.reload_config(config).await;
    }

    let servers_stopped = ctx.session.remove_workspace(&root).await;
    info!(root = %root.display(), stopped = servers_stopped.len(), "workspace removed");
    Ok(RemoveWorkspaceResult { servers_stopped })
}

pub async fn handle_restart_workspace(
    ctx: &HandlerContext,
    params: WorkspaceParams,
) -> Result<RestartWorkspaceResult, RpcError> {
    let root = PathBuf::from(&params.workspace_root);
    let restarted = ctx.session.restart_workspace(&root).await?;
    Ok(RestartWorkspaceResult { restarted })
}

pub async fn handle_describe_session(
    ctx: &HandlerContext,
    _params: serde_json::Value,
) -> Result<DescribeResult, RpcError> {
    let workspaces = ctx
        .session
        .list_workspaces()
        .await
        .into_iter()
        .map(|(root, server, server_pid, open_documents)| WorkspaceInfo {
            root,
            server,
            server_pid,
            open_documents,
        })
        .collect();

    Ok(DescribeResult {
        daemon_pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        symbol_cache: ctx.symbols.info().await,
        hover_cache: ctx.hovers.info().await,
        workspaces,
    })
}
