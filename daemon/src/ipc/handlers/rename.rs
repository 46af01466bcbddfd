// SPDX-License-Identifier: MIT
//! `rename` and `mv` — workspace-wide edits.
//!
//! Both apply the server's WorkspaceEdit atomically: every file's new
//! content is staged in memory first, so a failure during staging leaves
//! the tree untouched (all files update or none do).

use std::path::PathBuf;

use serde_json::Value;

use leta_proto::{
    ErrorKind, MoveFileParams, MoveFileResult, RenameParams, RenameResult, RpcError,
};

use crate::lsp::capabilities;
use crate::text::{path_to_uri, relative_path};

use super::{position_params, HandlerContext, StagedEdit};

pub async fn handle_rename(
    ctx: &HandlerContext,
    params: RenameParams,
) -> Result<RenameResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let file_path = PathBuf::from(&params.path);

    let workspace = ctx
        .session
        .workspace_for_file(&file_path, &workspace_root)
        .await?;
    workspace
        .require_capability("textDocument/rename", capabilities::supports_rename)
        .await?;
    workspace.ensure_document_open(&file_path).await?;

    let mut request = position_params(&file_path, params.line, params.column);
    request["newName"] = Value::String(params.new_name.clone());

    let response = workspace
        .client()
        .await?
        .request_value("textDocument/rename", request)
        .await;
    workspace.close_document(&file_path).await;
    let edit = response?;

    if edit.is_null() {
        return Err(RpcError::new(
            ErrorKind::ServerError,
            "server returned no edit for rename",
        ));
    }

    let staged = StagedEdit::stage(&edit)?;
    let changed = staged.commit()?;

    workspace.restart_after_rename_if_needed().await;

    let mut files_changed: Vec<String> = changed
        .iter()
        .map(|p| relative_path(p, &workspace_root))
        .collect();
    files_changed.sort();
    files_changed.dedup();

    Ok(RenameResult { files_changed })
}

pub async fn handle_move_file(
    ctx: &HandlerContext,
    params: MoveFileParams,
) -> Result<MoveFileResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let old_path = PathBuf::from(&params.old_path);
    let new_path = PathBuf::from(&params.new_path);

    if !old_path.exists() {
        return Err(RpcError::new(
            ErrorKind::NotFound,
            format!("source file does not exist: {}", old_path.display()),
        ));
    }
    if new_path.exists() {
        return Err(RpcError::new(
            ErrorKind::IoError,
            format!("destination already exists: {}", new_path.display()),
        ));
    }

    let workspace = ctx
        .session
        .workspace_for_file(&old_path, &workspace_root)
        .await?;

    let caps = workspace.capabilities().await?;
    let mut changed: Vec<PathBuf> = Vec::new();
    let mut moved_by_edit = false;
    let mut imports_updated = false;

    if capabilities::supports_will_rename_files(&caps) {
        let request = serde_json::json!({
            "files": [{
                "oldUri": path_to_uri(&old_path).to_string(),
                "newUri": path_to_uri(&new_path).to_string(),
            }]
        });
        let response = workspace
            .client()
            .await?
            .request_value("workspace/willRenameFiles", request)
            .await
            .unwrap_or(Value::Null);

        if !response.is_null() {
            let mut staged = StagedEdit::stage(&response)?;
            moved_by_edit = staged.renames_file(&old_path, &new_path);
            // Edits the server addressed to the old path apply at the new
            // location once the file has moved.
            staged.redirect_write(&old_path, &new_path);
            changed = staged.commit()?;
        }
    }
    // Capability miss: the file still moves, with zero import edits.

    if !moved_by_edit {
        if let Some(parent) = new_path.parent() {
            std::fs::create_dir_all(parent).map_err(super::io_error)?;
        }
        std::fs::rename(&old_path, &new_path).map_err(super::io_error)?;
        changed.push(new_path.clone());
    }

    let new_rel = relative_path(&new_path, &workspace_root);
    let mut files_changed: Vec<String> = changed
        .iter()
        .map(|p| relative_path(p, &workspace_root))
        .collect();
    files_changed.sort();
    files_changed.dedup();
    if files_changed.iter().any(|f| f != &new_rel) {
        imports_updated = true;
    }

    Ok(MoveFileResult {
        files_changed,
        imports_updated,
    })
}
