// SPDX-License-Identifier: MIT
//! `format` and `organize-imports` — single-file edit operations.

use std::path::PathBuf;

use serde_json::{json, Value};

use leta_proto::{FormatParams, FormatResult, RpcError};

use crate::lsp::capabilities;
use crate::text::{count_lines, path_to_uri, read_file_content, relative_path};

use super::{apply_text_edits, io_error, HandlerContext};

pub async fn handle_format(
    ctx: &HandlerContext,
    params: FormatParams,
) -> Result<FormatResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let file_path = PathBuf::from(&params.path);

    let workspace = ctx
        .session
        .workspace_for_file(&file_path, &workspace_root)
        .await?;
    workspace
        .require_capability("textDocument/formatting", capabilities::supports_formatting)
        .await?;
    workspace.ensure_document_open(&file_path).await?;

    let formatting = ctx.config().await.formatting;
    let request = json!({
        "textDocument": {"uri": path_to_uri(&file_path).to_string()},
        "options": {
            "tabSize": formatting.tab_size,
            "insertSpaces": formatting.insert_spaces,
        },
    });

    let response = workspace
        .client()
        .await?
        .request_value("textDocument/formatting", request)
        .await;
    workspace.close_document(&file_path).await;
    let response = response?;

    let edits: Vec<lsp_types::TextEdit> = match response {
        Value::Null => Vec::new(),
        other => serde_json::from_value(other)
            .map_err(|e| RpcError::new(leta_proto::ErrorKind::ProtocolError, e.to_string()))?,
    };

    let edits_applied = edits.len() as u32;
    if !edits.is_empty() {
        let content = read_file_content(&file_path).map_err(io_error)?;
        let updated = apply_text_edits(&content, &edits);
        std::fs::write(&file_path, updated).map_err(io_error)?;
    }

    Ok(FormatResult {
        path: relative_path(&file_path, &workspace_root),
        edits_applied,
    })
}

pub async fn handle_organize_imports(
    ctx: &HandlerContext,
    params: FormatParams,
) -> Result<FormatResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let file_path = PathBuf::from(&params.path);

    let workspace = ctx
        .session
        .workspace_for_file(&file_path, &workspace_root)
        .await?;
    workspace
        .require_capability(
            "codeAction source.organizeImports",
            capabilities::supports_organize_imports,
        )
        .await?;
    workspace.ensure_document_open(&file_path).await?;

    let content = read_file_content(&file_path).map_err(io_error)?;
    let end_line = count_lines(&content);

    let request = json!({
        "textDocument": {"uri": path_to_uri(&file_path).to_string()},
        "range": {
            "start": {"line": 0, "character": 0},
            "end": {"line": end_line, "character": 0},
        },
        "context": {
            "diagnostics": [],
            "only": ["source.organizeImports"],
        },
    });

    let response = workspace
        .client()
        .await?
        .request_value("textDocument/codeAction", request)
        .await;
    workspace.close_document(&file_path).await;
    let response = response?;

    let actions = response.as_array().cloned().unwrap_or_default();
    let mut edits_applied = 0u32;

    for action in actions {
        let Some(edit) = action.get("edit") else {
            // Command-only actions would need workspace/executeCommand and
            // server-side application; nothing to apply locally.
            continue;
        };
        let staged = super::StagedEdit::stage(edit)?;
        if staged.is_empty() {
            continue;
        }
        let changed = staged.commit()?;
        edits_applied += changed.len() as u32;
        // One organize-imports action is enough.
        break;
    }

    Ok(FormatResult {
        path: relative_path(&file_path, &workspace_root),
        edits_applied,
    })
}
