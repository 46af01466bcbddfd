// SPDX-License-Identifier: MIT
//! `diagnostics` — collect publishDiagnostics for one file or the whole
//! workspace.
//!
//! Servers push diagnostics in response to didOpen, so each target file is
//! opportunistically (re)opened, its publishDiagnostics notification
//! awaited with a bounded window, then closed again. The timeout applies
//! per file, never to the whole batch, and per-file failures end up in the
//! `warning` field instead of aborting the aggregate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use leta_proto::{DiagnosticInfo, DiagnosticsParams, DiagnosticsResult, RpcError, Severity};

use crate::index::enumerate_source_files;
use crate::text::{path_to_uri, relative_path};

use super::HandlerContext;

const PUBLISH_WINDOW: Duration = Duration::from_secs(3);

pub async fn handle_diagnostics(
    ctx: &HandlerContext,
    params: DiagnosticsParams,
) -> Result<DiagnosticsResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let floor = params.severity.unwrap_or(Severity::Hint);

    let targets: Vec<PathBuf> = match &params.path {
        Some(path) => vec![PathBuf::from(path)],
        None => {
            let config = ctx.config().await;
            let excluded: HashSet<String> = config
                .workspaces
                .excluded_languages
                .iter()
                .cloned()
                .collect();
            enumerate_source_files(&workspace_root, &excluded)
        }
    };

    let mut diagnostics = Vec::new();
    let mut failed = Vec::new();

    for file in &targets {
        match collect_for_file(ctx, &workspace_root, file, floor).await {
            Ok(mut items) => diagnostics.append(&mut items),
            Err(e) => {
                debug!(file = %file.display(), err = %e, "diagnostics failed");
                failed.push(relative_path(file, &workspace_root));
            }
        }
    }

    diagnostics.sort_by(|a, b| (&a.path, a.line, a.column).cmp(&(&b.path, b.line, b.column)));

    let warning = if failed.is_empty() {
        None
    } else {
        failed.truncate(10);
        Some(format!("no diagnostics from: {}", failed.join(", ")))
    };

    Ok(DiagnosticsResult {
        diagnostics,
        warning,
    })
}

async fn collect_for_file(
    ctx: &HandlerContext,
    workspace_root: &Path,
    file: &Path,
    floor: Severity,
) -> Result<Vec<DiagnosticInfo>, RpcError> {
    let workspace = ctx.session.workspace_for_file(file, workspace_root).await?;
    let client = workspace.client().await?;
    let uri = path_to_uri(file).to_string();

    // Subscribe before opening so the publish triggered by didOpen cannot
    // be missed; force a fresh didOpen so the server re-publishes even for
    // documents it already had open.
    let mut notifications = client.notifications();
    workspace.close_document(file).await;
    workspace.ensure_document_open(file).await?;

    let rel_path = relative_path(file, workspace_root);
    let mut collected = Vec::new();

    let deadline = tokio::time::Instant::now() + PUBLISH_WINDOW;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        let remaining = deadline - now;
        match tokio::time::timeout(remaining, notifications.recv()).await {
            Ok(Ok(notification)) => {
                if notification.method != "textDocument/publishDiagnostics" {
                    continue;
                }
                if notification.params.get("uri").and_then(|u| u.as_str()) != Some(uri.as_str()) {
                    continue;
                }
                let items = notification
                    .params
                    .get("diagnostics")
                    .and_then(|d| d.as_array())
                    .cloned()
                    .unwrap_or_default();
                for item in items {
                    let severity = item
                        .get("severity")
                        .and_then(|s| s.as_u64())
                        .map(|s| Severity::from_lsp_int(s as u32))
                        .unwrap_or(Severity::Information);
                    if severity < floor {
                        continue;
                    }
                    collected.push(DiagnosticInfo {
                        path: rel_path.clone(),
                        line: item
                            .pointer("/range/start/line")
                            .and_then(|l| l.as_u64())
                            .unwrap_or(0) as u32
                            + 1,
                        column: item
                            .pointer("/range/start/character")
                            .and_then(|c| c.as_u64())
                            .unwrap_or(0) as u32,
                        severity,
                        source: item
                            .get("source")
                            .and_then(|s| s.as_str())
                            .map(str::to_string),
                        message: item
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("")
                            .to_string(),
                    });
                }
                // One publish per open is the protocol's contract.
                break;
            }
            Ok(Err(_)) | Err(_) => break,
        }
    }

    workspace.close_document(file).await;
    Ok(collected)
}
