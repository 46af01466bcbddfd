// SPDX-License-Identifier: MIT
//! `replace-function` — splice a new body over a function's byte range,
//! with an optional signature check.
//!
//! The original file is snapshotted to a backup before the splice. With
//! the signature check on, the signature extracted after the replacement
//! must match the original (modulo spelling normalization); a mismatch —
//! or any error after the write — restores the backup.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use leta_proto::{ErrorKind, ReplaceFunctionParams, ReplaceFunctionResult, RpcError};

use crate::session::WorkspaceHandle;
use crate::text::{path_to_uri, read_file_content};

use super::{
    extract_hover_text, io_error, position_params, resolve_expr, HandlerContext,
};

pub async fn handle_replace_function(
    ctx: &HandlerContext,
    params: ReplaceFunctionParams,
) -> Result<ReplaceFunctionResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);

    let resolved = resolve_expr(ctx, &workspace_root, &params.expr).await?;
    if !resolved.kind.is_callable() {
        return Err(RpcError::new(
            ErrorKind::UsageError,
            format!(
                "symbol '{}' is a {}, not a Function, Method, or Constructor",
                params.expr, resolved.kind
            ),
        ));
    }
    let (Some(range_start), Some(range_end)) =
        (resolved.range_start_line, resolved.range_end_line)
    else {
        return Err(RpcError::new(
            ErrorKind::NotSupported,
            "language server does not provide symbol ranges",
        ));
    };

    let file_path = PathBuf::from(&resolved.path);
    let workspace = ctx
        .session
        .workspace_for_file(&file_path, &workspace_root)
        .await?;
    workspace.ensure_document_open(&file_path).await?;

    let old_signature = if params.check_signature {
        extract_signature(&workspace, &file_path, resolved.line, resolved.column).await
    } else {
        None
    };

    let original = read_file_content(&file_path).map_err(io_error)?;
    let backup_path = backup_path_for(&file_path);
    std::fs::write(&backup_path, &original).map_err(io_error)?;

    let outcome = splice_and_check(
        &workspace,
        &file_path,
        &original,
        &params,
        range_start,
        range_end,
        resolved.column,
        old_signature.as_deref(),
    )
    .await;

    match outcome {
        Ok(new_line_count) => {
            let _ = std::fs::remove_file(&backup_path);
            workspace.close_document(&file_path).await;
            let rel_path = crate::text::relative_path(&file_path, &workspace_root);
            Ok(ReplaceFunctionResult {
                path: rel_path,
                old_range: format!("{range_start}-{range_end}"),
                new_range: format!("{range_start}-{}", range_start + new_line_count - 1),
                lines_replaced: new_line_count,
            })
        }
        Err(e) => {
            // Any failure after the write restores the snapshot, on disk
            // and in the server's view.
            let _ = std::fs::write(&file_path, &original);
            let _ = std::fs::remove_file(&backup_path);
            let _ = workspace.change_document(&file_path, &original).await;
            workspace.close_document(&file_path).await;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn splice_and_check(
    workspace: &WorkspaceHandle<'_>,
    file_path: &Path,
    original: &str,
    params: &ReplaceFunctionParams,
    range_start: u32,
    range_end: u32,
    column: u32,
    old_signature: Option<&str>,
) -> Result<u32, RpcError> {
    let (new_content, new_line_count) =
        splice_body(original, &params.new_body, range_start, range_end);

    std::fs::write(file_path, &new_content).map_err(io_error)?;
    workspace.change_document(file_path, &new_content).await?;

    if params.check_signature {
        // Give the server a beat to reanalyze before asking for hover.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let new_signature = extract_signature(workspace, file_path, range_start, column).await;
        let Some(new_signature) = new_signature else {
            return Err(RpcError::new(
                ErrorKind::SignatureChanged,
                "could not extract a signature from the new body; \
                 pass --no-check-signature to replace anyway",
            ));
        };
        if let Some(old) = old_signature {
            if !signatures_match(old, &new_signature) {
                return Err(RpcError::new(
                    ErrorKind::SignatureChanged,
                    format!("signature changed\n  old: {old}\n  new: {new_signature}"),
                ));
            }
        }
    }

    Ok(new_line_count)
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".leta.bkup");
    path.with_file_name(name)
}

/// Replace lines [start..=end] (1-based) with `new_body`, re-indented to
/// the original first line's leading whitespace.
fn splice_body(original: &str, new_body: &str, range_start: u32, range_end: u32) -> (String, u32) {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let start_idx = range_start.saturating_sub(1) as usize;
    let end_idx = (range_end.saturating_sub(1) as usize).min(lines.len().saturating_sub(1));

    let indentation = lines
        .get(start_idx)
        .map(|line| {
            let trimmed = line.trim_start();
            &line[..line.len() - trimmed.len()]
        })
        .unwrap_or("")
        .to_string();

    let mut body_lines: Vec<String> = new_body.split_inclusive('\n').map(str::to_string).collect();
    if let Some(last) = body_lines.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }

    // Shift the body so its first line's indent matches the original's.
    if let Some(first) = body_lines.first() {
        let trimmed = first.trim_start();
        let body_indent = first.len() - trimmed.len();
        body_lines = body_lines
            .into_iter()
            .map(|line| {
                if line.trim().is_empty() {
                    line
                } else if line.len() >= body_indent && line[..body_indent].trim().is_empty() {
                    format!("{indentation}{}", &line[body_indent..])
                } else {
                    format!("{indentation}{}", line.trim_start())
                }
            })
            .collect();
    }

    let count = body_lines.len() as u32;
    let mut out = String::new();
    for line in &lines[..start_idx.min(lines.len())] {
        out.push_str(line);
    }
    for line in &body_lines {
        out.push_str(line);
    }
    if end_idx + 1 < lines.len() {
        for line in &lines[end_idx + 1..] {
            out.push_str(line);
        }
    }
    (out, count)
}

/// Signature of the symbol at a position: documentSymbol `detail` when the
/// server provides one, hover's first code line otherwise.
async fn extract_signature(
    workspace: &WorkspaceHandle<'_>,
    file_path: &Path,
    line: u32,
    column: u32,
) -> Option<String> {
    let client = workspace.client().await.ok()?;

    let symbols = client
        .request_value(
            "textDocument/documentSymbol",
            serde_json::json!({"textDocument": {"uri": path_to_uri(file_path).to_string()}}),
        )
        .await
        .ok();
    if let Some(symbols) = symbols {
        if let Some(sig) = signature_from_symbols(&symbols, line) {
            return Some(sig);
        }
    }

    let hover = client
        .request_value("textDocument/hover", position_params(file_path, line, column))
        .await
        .ok()?;
    let text = extract_hover_text(&hover)?;
    signature_from_hover(&text)
}

/// Find the symbol whose selection range starts on `line` (1-based) and
/// join its name with its detail.
fn signature_from_symbols(symbols: &serde_json::Value, line: u32) -> Option<String> {
    let items = symbols.as_array()?;
    for item in items {
        let sel_line = item
            .pointer("/selectionRange/start/line")
            .and_then(|l| l.as_u64())
            .map(|l| l as u32 + 1);
        if sel_line == Some(line) {
            let name = item.get("name")?.as_str()?;
            let detail = item.get("detail").and_then(|d| d.as_str())?;
            if detail.is_empty() {
                return None;
            }
            return Some(if let Some(rest) = detail.strip_prefix("func") {
                format!("func {name}{rest}")
            } else if let Some(rest) = detail.strip_prefix("fn") {
                format!("fn {name}{rest}")
            } else {
                format!("{name} {detail}")
            });
        }
        if let Some(children) = item.get("children") {
            if let Some(found) = signature_from_symbols(children, line) {
                return Some(found);
            }
        }
    }
    None
}

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\w*\n(.+?)```").expect("static regex"));

/// First signature-looking line out of hover text, preferring fenced code.
fn signature_from_hover(text: &str) -> Option<String> {
    let code = CODE_BLOCK
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| text.trim().to_string());

    for line in code.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if ["def ", "fn ", "func ", "function "]
            .iter()
            .any(|kw| line.contains(kw))
            || line.starts_with("(function)")
            || line.starts_with("(method)")
        {
            // Cut an opening body brace off.
            let cut = line.find('{').map(|i| line[..i].trim()).unwrap_or(line);
            return Some(cut.to_string());
        }
    }
    code.lines().next().map(|l| l.trim().to_string())
}

static SIG_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\((function|method)\)\s*").expect("static regex"));
static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

fn normalize_signature(sig: &str) -> String {
    let sig = SIG_PREFIX.replace(sig, "");
    let sig = WS_RUN.replace_all(sig.trim(), " ");
    sig.replace(", ", ",")
        .replace(" ,", ",")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace(" :", ":")
        .replace(": ", ":")
        .replace(" ->", "->")
        .replace("-> ", "->")
}

fn signatures_match(old: &str, new: &str) -> bool {
    normalize_signature(old) == normalize_signature(new)
}
