// SPDX-License-Identifier: MIT
//! Operation handlers: one module per operation family, all sharing the
//! thin shape — parse params, resolve targets, dispatch LSP requests,
//! format a typed result. Failures are taxonomy values, never panics.

mod calls;
mod diagnostics;
mod files;
mod format;
mod grep;
mod refs;
mod rename;
mod replace;
mod resolve;
mod show;
mod workspace;

pub use calls::handle_calls;
pub use diagnostics::handle_diagnostics;
pub use files::handle_files;
pub use format::{handle_format, handle_organize_imports};
pub use grep::handle_grep;
pub use rename::{handle_move_file, handle_rename};
pub use replace::handle_replace_function;
pub use resolve::handle_resolve_symbol;
pub use show::handle_show;
pub use refs::{
    handle_declaration, handle_implementations, handle_references, handle_subtypes,
    handle_supertypes,
};
pub use workspace::{
    handle_add_workspace, handle_describe_session, handle_remove_workspace,
    handle_restart_workspace,
};

use std::path::Path;
use std::sync::Arc;

use lsp_types::{Location, TextEdit};
use serde_json::{json, Value};

use leta_proto::{ErrorKind, LocationHit, ResolvedSymbol, RpcError};

use crate::cache::{HoverCache, HoverKey};
use crate::config::Config;
use crate::index::{collect_workspace, SymbolIndex};
use crate::lsp::LspError;
use crate::resolve::ResolveError;
use crate::session::Session;
use crate::text::{
    content_hash, lines_around, path_to_uri, read_file_content, relative_path, uri_to_path,
    utf16_col_to_byte,
};

/// Everything a handler needs; cloned per request, shared underneath.
#[derive(Clone)]
pub struct HandlerContext {
    pub session: Arc<Session>,
    pub symbols: Arc<SymbolIndex>,
    pub hovers: Arc<HoverCache>,
}

impl HandlerContext {
    pub async fn config(&self) -> Config {
        self.session.config().await
    }
}

// ─── Error mapping ───────────────────────────────────────────────────────────

impl From<LspError> for RpcError {
    fn from(err: LspError) -> Self {
        let kind = match &err {
            LspError::TimedOut { .. } => ErrorKind::TimedOut,
            LspError::ServerDead => ErrorKind::ServerDead,
            LspError::Server { .. } => ErrorKind::ServerError,
            LspError::NotSupported { .. } => ErrorKind::NotSupported,
            LspError::Restarted => ErrorKind::Restarted,
            LspError::Io(_) | LspError::Spawn { .. } => ErrorKind::IoError,
            LspError::Json(_) | LspError::Frame(_) => ErrorKind::ProtocolError,
        };
        RpcError::new(kind, err.to_string())
    }
}

impl From<ResolveError> for RpcError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Usage(detail) => RpcError::new(ErrorKind::UsageError, detail),
            ResolveError::NotFound(detail) => RpcError::new(ErrorKind::NotFound, detail),
            ResolveError::Ambiguous { detail, candidates } => {
                RpcError::ambiguous(detail, candidates)
            }
        }
    }
}

pub fn io_error(err: impl std::fmt::Display) -> RpcError {
    RpcError::new(ErrorKind::IoError, err.to_string())
}

// ─── Shared building blocks ──────────────────────────────────────────────────

/// Resolve a symbol expression by collecting symbol trees across the whole
/// workspace and matching the expression against them.
pub async fn resolve_expr(
    ctx: &HandlerContext,
    workspace_root: &Path,
    expr: &str,
) -> Result<ResolvedSymbol, RpcError> {
    let (files, _failed) = collect_workspace(&ctx.session, &ctx.symbols, workspace_root)
        .await
        .map_err(RpcError::from)?;
    crate::resolve::resolve(expr, &files, workspace_root).map_err(RpcError::from)
}

/// `{textDocument, position}` params for a position-targeted request.
/// Lines arrive 1-based from the proto layer; the wire wants 0-based.
pub fn position_params(path: &Path, line: u32, column: u32) -> Value {
    json!({
        "textDocument": {"uri": path_to_uri(path).to_string()},
        "position": {"line": line.saturating_sub(1), "character": column},
    })
}

/// Convert LSP locations into workspace-relative hits with optional
/// surrounding context lines, sorted by (path, line).
pub fn format_locations(
    locations: &[Location],
    workspace_root: &Path,
    context: u32,
) -> Vec<LocationHit> {
    let mut out = Vec::new();
    for loc in locations {
        let file_path = uri_to_path(&loc.uri);
        let mut hit = LocationHit {
            path: relative_path(&file_path, workspace_root),
            line: loc.range.start.line + 1,
            column: loc.range.start.character,
            name: None,
            kind: None,
            detail: None,
            context_start: None,
            context_lines: None,
        };
        if context > 0 && file_path.exists() {
            if let Ok(content) = read_file_content(&file_path) {
                let (lines, start, _) =
                    lines_around(&content, loc.range.start.line as usize, context as usize);
                hit.context_lines = Some(lines);
                hit.context_start = Some(start as u32 + 1);
            }
        }
        out.push(hit);
    }
    out.sort_by(|a, b| (&a.path, a.line).cmp(&(&b.path, b.line)));
    out
}

/// Parse a `Location | Location[] | LocationLink[]` response value.
pub fn locations_from_value(value: &Value) -> Vec<Location> {
    fn one(value: &Value) -> Option<Location> {
        if value.get("targetUri").is_some() {
            let uri = value.get("targetUri")?.as_str()?.parse().ok()?;
            let range = serde_json::from_value(value.get("targetSelectionRange")?.clone()).ok()?;
            Some(Location { uri, range })
        } else {
            serde_json::from_value(value.clone()).ok()
        }
    }

    match value {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        Value::Null => Vec::new(),
        single => one(single).into_iter().collect(),
    }
}

/// Pull the text out of a hover response's `contents`, which is a
/// `MarkedString | MarkedString[] | MarkupContent` union.
pub fn extract_hover_text(hover: &Value) -> Option<String> {
    let contents = hover.get("contents")?;
    fn marked(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("value").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        }
    }
    match contents {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(marked).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        other => marked(other),
    }
}

/// Hover docs for a symbol position, via the hover cache. Returns None on
/// any failure; docs are best-effort decoration.
pub async fn symbol_docs(
    ctx: &HandlerContext,
    workspace_root: &Path,
    rel_path: &str,
    line: u32,
    column: u32,
) -> Option<String> {
    let file_path = workspace_root.join(rel_path);
    let uri = path_to_uri(&file_path).to_string();
    let hash = content_hash(&file_path);
    let key = HoverKey {
        uri,
        line,
        column,
        content_hash: hash,
    };

    if let Some(cached) = ctx.hovers.get(&key).await {
        return if cached.is_empty() { None } else { Some(cached) };
    }

    let workspace = ctx
        .session
        .workspace_for_file(&file_path, workspace_root)
        .await
        .ok()?;
    let was_open = workspace.is_document_open(&file_path).await;
    workspace.ensure_document_open(&file_path).await.ok()?;

    let response = workspace
        .client()
        .await
        .ok()?
        .request_value("textDocument/hover", position_params(&file_path, line, column))
        .await;

    if !was_open {
        workspace.close_document(&file_path).await;
    }

    let docs = response.ok().as_ref().and_then(extract_hover_text);
    ctx.hovers
        .insert(key, docs.clone().unwrap_or_default())
        .await;
    docs
}

// ─── Workspace edit application ──────────────────────────────────────────────

/// Apply text edits to file content. Edit positions are UTF-16 columns on
/// the wire; they are converted to byte offsets here before splicing.
pub fn apply_text_edits(content: &str, edits: &[TextEdit]) -> String {
    // Byte offset of each line start.
    let mut line_starts = vec![0usize];
    for (idx, byte) in content.bytes().enumerate() {
        if byte == b'\n' {
            line_starts.push(idx + 1);
        }
    }

    let pos_to_offset = |pos: &lsp_types::Position| -> usize {
        let line_idx = pos.line as usize;
        if line_idx >= line_starts.len() {
            return content.len();
        }
        let start = line_starts[line_idx];
        let end = line_starts
            .get(line_idx + 1)
            .map(|next| next - 1)
            .unwrap_or(content.len());
        let line = content[start..end].trim_end_matches('\r');
        start + utf16_col_to_byte(line, pos.character)
    };

    let mut sorted: Vec<&TextEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| {
        std::cmp::Reverse((e.range.start.line, e.range.start.character))
    });

    let mut result = content.to_string();
    for edit in sorted {
        let start = pos_to_offset(&edit.range.start);
        let end = pos_to_offset(&edit.range.end).max(start);
        result.replace_range(start..end.min(result.len()), &edit.new_text);
    }
    result
}

/// A staged workspace edit: all new file contents are computed up front so
/// either every file is written or none is.
pub struct StagedEdit {
    writes: Vec<(std::path::PathBuf, String)>,
    renames: Vec<(std::path::PathBuf, std::path::PathBuf)>,
    creates: Vec<std::path::PathBuf>,
    deletes: Vec<std::path::PathBuf>,
}

impl StagedEdit {
    /// Stage a server WorkspaceEdit. Reads every target file and computes
    /// its post-edit content; nothing touches disk yet.
    pub fn stage(edit: &Value) -> Result<StagedEdit, RpcError> {
        let mut writes: Vec<(std::path::PathBuf, String)> = Vec::new();
        let mut renames = Vec::new();
        let mut creates = Vec::new();
        let mut deletes = Vec::new();

        let mut stage_text_edits = |uri: &str, edits: Value| -> Result<(), RpcError> {
            let uri: lsp_types::Uri = uri
                .parse()
                .map_err(|_| RpcError::new(ErrorKind::ProtocolError, format!("bad uri: {uri}")))?;
            let path = uri_to_path(&uri);
            let parsed: Vec<TextEdit> = serde_json::from_value(edits)
                .map_err(|e| RpcError::new(ErrorKind::ProtocolError, e.to_string()))?;
            if parsed.is_empty() {
                return Ok(());
            }
            // Later edits against the same file stack on staged content.
            let base = writes
                .iter()
                .find(|(p, _)| p == &path)
                .map(|(_, c)| c.clone())
                .map_or_else(|| read_file_content(&path).map_err(io_error), Ok)?;
            let updated = apply_text_edits(&base, &parsed);
            writes.retain(|(p, _)| p != &path);
            writes.push((path, updated));
            Ok(())
        };

        if let Some(changes) = edit.get("changes").and_then(|c| c.as_object()) {
            for (uri, edits) in changes {
                stage_text_edits(uri, edits.clone())?;
            }
        }

        if let Some(doc_changes) = edit.get("documentChanges").and_then(|c| c.as_array()) {
            for change in doc_changes {
                match change.get("kind").and_then(|k| k.as_str()) {
                    Some("create") => {
                        if let Some(uri) = change.get("uri").and_then(|u| u.as_str()) {
                            if let Ok(uri) = uri.parse::<lsp_types::Uri>() {
                                creates.push(uri_to_path(&uri));
                            }
                        }
                    }
                    Some("rename") => {
                        let old = change.get("oldUri").and_then(|u| u.as_str());
                        let new = change.get("newUri").and_then(|u| u.as_str());
                        if let (Some(old), Some(new)) = (old, new) {
                            if let (Ok(old), Ok(new)) =
                                (old.parse::<lsp_types::Uri>(), new.parse::<lsp_types::Uri>())
                            {
                                renames.push((uri_to_path(&old), uri_to_path(&new)));
                            }
                        }
                    }
                    Some("delete") => {
                        if let Some(uri) = change.get("uri").and_then(|u| u.as_str()) {
                            if let Ok(uri) = uri.parse::<lsp_types::Uri>() {
                                deletes.push(uri_to_path(&uri));
                            }
                        }
                    }
                    _ => {
                        // TextDocumentEdit: {textDocument: {uri}, edits: [...]}
                        let uri = change
                            .pointer("/textDocument/uri")
                            .and_then(|u| u.as_str());
                        if let Some(uri) = uri {
                            // Edits may be AnnotatedTextEdit; strip to TextEdit shape.
                            let edits = change.get("edits").cloned().unwrap_or(Value::Null);
                            let plain: Vec<Value> = edits
                                .as_array()
                                .map(|arr| {
                                    arr.iter()
                                        .map(|e| {
                                            e.get("textEdit").cloned().unwrap_or_else(|| e.clone())
                                        })
                                        .collect()
                                })
                                .unwrap_or_default();
                            stage_text_edits(uri, Value::Array(plain))?;
                        }
                    }
                }
            }
        }

        Ok(StagedEdit {
            writes,
            renames,
            creates,
            deletes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
            && self.renames.is_empty()
            && self.creates.is_empty()
            && self.deletes.is_empty()
    }

    /// When a text edit targets a file that a resource op (or the caller)
    /// moves, redirect the staged write to the new path.
    pub fn redirect_write(&mut self, old: &Path, new: &Path) {
        for (path, _) in &mut self.writes {
            if path == old {
                *path = new.to_path_buf();
            }
        }
    }

    /// True when one of the staged resource ops renames `old` → `new`.
    pub fn renames_file(&self, old: &Path, new: &Path) -> bool {
        self.renames.iter().any(|(o, n)| o == old && n == new)
    }

    /// Commit everything to disk. Content for every write was staged up
    /// front, so a failure before this point leaves the tree untouched.
    pub fn commit(self) -> Result<Vec<std::path::PathBuf>, RpcError> {
        let mut changed = Vec::new();

        for path in &self.creates {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            std::fs::write(path, "").map_err(io_error)?;
            changed.push(path.clone());
        }

        for (old, new) in &self.renames {
            if let Some(parent) = new.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            if old.exists() {
                std::fs::rename(old, new).map_err(io_error)?;
            }
            changed.push(new.clone());
        }

        for (path, content) in &self.writes {
            std::fs::write(path, content).map_err(io_error)?;
            changed.push(path.clone());
        }

        for path in &self.deletes {
            let _ = std::fs::remove_file(path);
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    fn edit(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextEdit {
        TextEdit {
            range: Range {
                start: Position { line: sl, character: sc },
                end: Position { line: el, character: ec },
            },
            new_text: text.to_string(),
        }
    }

    #[test]
    fn apply_single_edit() {
        let content = "let old_name = 1;\nprint(old_name);\n";
        let result = apply_text_edits(content, &[edit(0, 4, 0, 12, "renamed")]);
        assert_eq!(result, "let renamed = 1;\nprint(old_name);\n");
    }

    #[test]
    fn apply_multiple_edits_preserves_later_positions() {
        let content = "a b a\n";
        // Two edits on the same line, positions given against the original.
        let result = apply_text_edits(content, &[edit(0, 0, 0, 1, "xx"), edit(0, 4, 0, 5, "yy")]);
        assert_eq!(result, "xx b yy\n");
    }

    #[test]
    fn apply_multiline_edit() {
        let content = "fn a() {\n    1\n}\n";
        let result = apply_text_edits(content, &[edit(0, 0, 2, 1, "fn b() { 2 }")]);
        assert_eq!(result, "fn b() { 2 }\n");
    }

    #[test]
    fn apply_edit_with_utf16_columns() {
        // '𝕏' occupies 2 UTF-16 units; an edit after it must land after
        // all 4 of its UTF-8 bytes.
        let content = "𝕏x = 1\n";
        let result = apply_text_edits(content, &[edit(0, 2, 0, 3, "y")]);
        assert_eq!(result, "𝕏y = 1\n");
    }

    #[test]
    fn apply_edit_past_end_appends() {
        let content = "short\n";
        let result = apply_text_edits(content, &[edit(9, 0, 9, 0, "tail")]);
        assert_eq!(result, "short\ntail");
    }

    #[test]
    fn staged_edit_is_atomic_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.ts");
        std::fs::write(&real, "export const x = 1;\n").unwrap();

        let real_uri = crate::text::path_to_uri(&real).to_string();
        let missing_uri =
            crate::text::path_to_uri(&dir.path().join("missing.ts")).to_string();

        let edit_value = json!({
            "changes": {
                real_uri: [{"range": {"start": {"line": 0, "character": 13}, "end": {"line": 0, "character": 14}}, "newText": "y"}],
                missing_uri: [{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}}, "newText": "z"}],
            }
        });

        // Staging fails on the unreadable file…
        assert!(StagedEdit::stage(&edit_value).is_err());
        // …and the readable one is untouched.
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "export const x = 1;\n");
    }

    #[test]
    fn staged_edit_commits_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ts");
        let b = dir.path().join("b.ts");
        std::fs::write(&a, "old\n").unwrap();
        std::fs::write(&b, "use old\n").unwrap();

        let a_uri = crate::text::path_to_uri(&a).to_string();
        let b_uri = crate::text::path_to_uri(&b).to_string();
        let edit_value = json!({
            "changes": {
                a_uri: [
                    {"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}}, "newText": "new"}
                ],
                b_uri: [
                    {"range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 7}}, "newText": "new"}
                ],
            }
        });

        let staged = StagedEdit::stage(&edit_value).unwrap();
        let changed = staged.commit().unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "new\n");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "use new\n");
    }

    #[test]
    fn staged_edit_handles_document_changes_with_rename_op() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.ts");
        let consumer = dir.path().join("use.ts");
        std::fs::write(&old, "export {};\n").unwrap();
        std::fs::write(&consumer, "import './old';\n").unwrap();
        let new = dir.path().join("new.ts");

        let consumer_uri = crate::text::path_to_uri(&consumer).to_string();
        let old_uri = crate::text::path_to_uri(&old).to_string();
        let new_uri = crate::text::path_to_uri(&new).to_string();
        let edit_value = json!({
            "documentChanges": [
                {"textDocument": {"uri": consumer_uri, "version": null},
                 "edits": [{"range": {"start": {"line": 0, "character": 8}, "end": {"line": 0, "character": 13}}, "newText": "./new"}]},
                {"kind": "rename", "oldUri": old_uri, "newUri": new_uri},
            ]
        });

        let staged = StagedEdit::stage(&edit_value).unwrap();
        assert!(staged.renames_file(&old, &new));
        staged.commit().unwrap();
        assert!(new.exists());
        assert!(!old.exists());
        assert_eq!(std::fs::read_to_string(&consumer).unwrap(), "import './new';\n");
    }

    #[test]
    fn locations_from_value_accepts_all_shapes() {
        let scalar = json!({"uri": "file:///a.rs", "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 4}}});
        assert_eq!(locations_from_value(&scalar).len(), 1);

        let array = json!([scalar.clone(), scalar.clone()]);
        assert_eq!(locations_from_value(&array).len(), 2);

        let link = json!([{
            "targetUri": "file:///b.rs",
            "targetRange": {"start": {"line": 0, "character": 0}, "end": {"line": 9, "character": 0}},
            "targetSelectionRange": {"start": {"line": 2, "character": 4}, "end": {"line": 2, "character": 8}}
        }]);
        let parsed = locations_from_value(&link);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].range.start.line, 2);

        assert!(locations_from_value(&Value::Null).is_empty());
    }

    #[test]
    fn hover_text_extraction_shapes() {
        assert_eq!(
            extract_hover_text(&json!({"contents": "plain"})).as_deref(),
            Some("plain")
        );
        assert_eq!(
            extract_hover_text(&json!({"contents": {"kind": "markdown", "value": "**doc**"}}))
                .as_deref(),
            Some("**doc**")
        );
        assert_eq!(
            extract_hover_text(
                &json!({"contents": [{"language": "rust", "value": "fn f()"}, "more"]})
            )
            .as_deref(),
            Some("fn f()\nmore")
        );
        assert!(extract_hover_text(&json!({"contents": []})).is_none());
    }
}
