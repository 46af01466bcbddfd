// SPDX-License-Identifier: MIT
//! Per-file document-symbol cache and workspace-wide symbol collection.
//!
//! Cache keys are (URI, content-hash), so stale trees age out of the LRU
//! naturally instead of being invalidated explicitly: a changed file simply
//! misses. The value is the file's symbol tree flattened into a vector with
//! parent-by-index links (no back-pointers, no cycles); container paths are
//! recovered by walking the parent array.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use lsp_types::{DocumentSymbol, DocumentSymbolResponse, SymbolInformation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use leta_proto::{CacheInfo, SymbolHit, SymbolKind};

use crate::lsp::LspError;
use crate::servers::server_for_language;
use crate::session::{Session, WorkspaceHandle};
use crate::text::{content_hash, language_id, path_to_uri, relative_path};

/// Directories that never contain first-party sources; skipped on top of
/// gitignore rules.
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "venv",
    ".venv",
    "build",
    "dist",
    ".tox",
    ".eggs",
    "target",
    "vendor",
    "third_party",
    "coverage",
];

/// One symbol in a file's flattened tree. `parent` indexes into the same
/// vector; the root scope has `parent == None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    pub detail: Option<String>,
    pub parent: Option<usize>,
    /// Immediate container name; filled from the parent for nested trees
    /// and from `containerName` for flat responses.
    pub container: Option<String>,
    /// 1-based selection-range start line.
    pub line: u32,
    /// Selection-range start column in UTF-16 code units, as the wire
    /// carries it; converted to bytes only at display boundaries.
    pub column: u32,
    pub range_start_line: u32,
    pub range_end_line: u32,
}

/// A file's complete flattened symbol tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSymbols {
    pub rel_path: String,
    pub entries: Vec<SymbolEntry>,
}

impl FileSymbols {
    /// Container names from file scope down to (excluding) `idx`.
    pub fn container_path(&self, idx: usize) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.entries[idx].parent;
        while let Some(p) = current {
            chain.push(self.entries[p].name.clone());
            current = self.entries[p].parent;
        }
        if chain.is_empty() {
            if let Some(container) = &self.entries[idx].container {
                if !container.is_empty() {
                    chain.push(container.clone());
                }
            }
        }
        chain.reverse();
        chain
    }

    pub fn hit(&self, idx: usize) -> SymbolHit {
        let entry = &self.entries[idx];
        SymbolHit {
            name: entry.name.clone(),
            kind: entry.kind,
            path: self.rel_path.clone(),
            line: entry.line,
            column: entry.column,
            container: entry.container.clone(),
            detail: entry.detail.clone(),
            docs: None,
            range_start_line: Some(entry.range_start_line),
            range_end_line: Some(entry.range_end_line),
            reference: None,
        }
    }

    fn approx_bytes(&self) -> u64 {
        let mut total = self.rel_path.len() as u64;
        for e in &self.entries {
            total += 64
                + e.name.len() as u64
                + e.detail.as_ref().map(|d| d.len()).unwrap_or(0) as u64
                + e.container.as_ref().map(|c| c.len()).unwrap_or(0) as u64;
        }
        total
    }
}

/// Flatten a documentSymbol response into parent-indexed entries.
pub fn flatten_symbols(response: &DocumentSymbolResponse, rel_path: &str) -> FileSymbols {
    let mut entries = Vec::new();
    match response {
        DocumentSymbolResponse::Nested(symbols) => {
            flatten_nested(symbols, None, &mut entries);
        }
        DocumentSymbolResponse::Flat(symbols) => {
            for sym in symbols {
                entries.push(flat_entry(sym));
            }
        }
    }
    FileSymbols {
        rel_path: rel_path.to_string(),
        entries,
    }
}

fn flatten_nested(symbols: &[DocumentSymbol], parent: Option<usize>, out: &mut Vec<SymbolEntry>) {
    for sym in symbols {
        let idx = out.len();
        out.push(SymbolEntry {
            name: sym.name.clone(),
            kind: SymbolKind::from_lsp_int(lsp_kind_to_int(sym.kind)),
            detail: sym.detail.clone(),
            parent,
            container: parent.map(|p| out[p].name.clone()),
            line: sym.selection_range.start.line + 1,
            column: sym.selection_range.start.character,
            range_start_line: sym.range.start.line + 1,
            range_end_line: sym.range.end.line + 1,
        });
        if let Some(children) = &sym.children {
            flatten_nested(children, Some(idx), out);
        }
    }
}

fn flat_entry(sym: &SymbolInformation) -> SymbolEntry {
    SymbolEntry {
        name: sym.name.clone(),
        kind: SymbolKind::from_lsp_int(lsp_kind_to_int(sym.kind)),
        detail: None,
        parent: None,
        container: sym.container_name.clone(),
        line: sym.location.range.start.line + 1,
        column: sym.location.range.start.character,
        range_start_line: sym.location.range.start.line + 1,
        range_end_line: sym.location.range.end.line + 1,
    }
}

fn lsp_kind_to_int(kind: lsp_types::SymbolKind) -> u32 {
    // The numeric wire value survives serde; round-trip through JSON.
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_u64())
        .unwrap_or(13) as u32
}

// ─── Cache ───────────────────────────────────────────────────────────────────

type CacheKey = (String, String); // (uri, content-hash)

struct IndexInner {
    lru: LruCache<CacheKey, Arc<FileSymbols>>,
    current_bytes: u64,
}

/// Shared, read-mostly symbol cache with a byte budget. Misses on distinct
/// files proceed in parallel; a per-key guard collapses concurrent misses
/// on the same file into one fetch.
pub struct SymbolIndex {
    inner: Mutex<IndexInner>,
    inflight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    max_bytes: u64,
}

impl SymbolIndex {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(IndexInner {
                lru: LruCache::unbounded(),
                current_bytes: 0,
            }),
            inflight: Mutex::new(HashMap::new()),
            max_bytes,
        }
    }

    pub async fn info(&self) -> CacheInfo {
        let inner = self.inner.lock().await;
        CacheInfo {
            current_bytes: inner.current_bytes,
            max_bytes: self.max_bytes,
            entries: inner.lru.len() as u64,
        }
    }

    pub async fn get(&self, uri: &str, hash: &str) -> Option<Arc<FileSymbols>> {
        let mut inner = self.inner.lock().await;
        inner.lru.get(&(uri.to_string(), hash.to_string())).cloned()
    }

    pub async fn insert(&self, uri: String, hash: String, symbols: Arc<FileSymbols>) {
        let mut inner = self.inner.lock().await;
        let added = symbols.approx_bytes();
        if let Some(old) = inner.lru.push((uri, hash), symbols) {
            inner.current_bytes = inner.current_bytes.saturating_sub(old.1.approx_bytes());
        }
        inner.current_bytes += added;
        while inner.current_bytes > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_bytes =
                        inner.current_bytes.saturating_sub(evicted.approx_bytes());
                }
                None => break,
            }
        }
    }

    /// Cached tree for `path`, fetching from the server on a miss. Opens
    /// the document only for the fetch and closes it again unless the
    /// caller already had it open.
    pub async fn file_symbols(
        &self,
        workspace: &WorkspaceHandle<'_>,
        workspace_root: &Path,
        path: &Path,
    ) -> Result<Arc<FileSymbols>, LspError> {
        let uri = path_to_uri(path).to_string();
        let disk_hash = content_hash(path);

        if let Some(hit) = self.get(&uri, &disk_hash).await {
            return Ok(hit);
        }

        let key = (uri.clone(), disk_hash.clone());
        let guard = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _fetching = guard.lock().await;

        let result = self
            .fetch_uncached(workspace, workspace_root, path, &uri)
            .await;
        self.inflight.lock().await.remove(&key);
        result
    }

    async fn fetch_uncached(
        &self,
        workspace: &WorkspaceHandle<'_>,
        workspace_root: &Path,
        path: &Path,
        uri: &str,
    ) -> Result<Arc<FileSymbols>, LspError> {
        // Another task may have finished the same fetch while we waited on
        // the guard.
        let disk_hash = content_hash(path);
        if let Some(hit) = self.get(uri, &disk_hash).await {
            return Ok(hit);
        }

        let was_open = workspace.is_document_open(path).await;
        let synced_hash = workspace.ensure_document_open(path).await?;

        let response = workspace
            .client()
            .await?
            .request_value(
                "textDocument/documentSymbol",
                json!({"textDocument": {"uri": uri}}),
            )
            .await;

        if !was_open {
            workspace.close_document(path).await;
        }

        let value = response?;
        let symbols = if value.is_null() {
            FileSymbols {
                rel_path: relative_path(path, workspace_root),
                entries: Vec::new(),
            }
        } else {
            let parsed: DocumentSymbolResponse = serde_json::from_value(value)?;
            flatten_symbols(&parsed, &relative_path(path, workspace_root))
        };

        let symbols = Arc::new(symbols);
        self.insert(uri.to_string(), synced_hash, symbols.clone())
            .await;
        Ok(symbols)
    }
}

// ─── Workspace enumeration and collection ────────────────────────────────────

/// Enumerate source files under `root` that some registered server can
/// handle, honoring gitignore rules, the static skip list, and the
/// configured excluded languages.
pub fn enumerate_source_files(root: &Path, excluded_languages: &HashSet<String>) -> Vec<PathBuf> {
    let skip: HashSet<&str> = SKIP_DIRS.iter().copied().collect();
    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            !skip.contains(name.as_ref()) && !name.ends_with(".egg-info")
        })
        .build();

    let mut files = Vec::new();
    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let lang = language_id(path);
        if lang == "plaintext" || excluded_languages.contains(lang) {
            continue;
        }
        if server_for_language(lang, None).is_some() {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

/// Fetch the symbol trees of every source file under `root`, fanning out
/// per language and per file with bounded concurrency. Failed files are
/// skipped and reported in the returned warning list.
pub async fn collect_workspace(
    session: &Arc<Session>,
    index: &Arc<SymbolIndex>,
    root: &Path,
) -> Result<(Vec<Arc<FileSymbols>>, Vec<String>), LspError> {
    let config = session.config().await;
    let excluded: HashSet<String> = config
        .workspaces
        .excluded_languages
        .iter()
        .cloned()
        .collect();

    let files = enumerate_source_files(root, &excluded);
    let mut by_language: HashMap<&'static str, Vec<PathBuf>> = HashMap::new();
    for file in files {
        by_language.entry(language_id(&file)).or_default().push(file);
    }

    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let semaphore = Arc::new(Semaphore::new(parallelism));

    let mut all = Vec::new();
    let mut failed = Vec::new();

    for (lang, files) in by_language {
        let workspace = match session.workspace_for_language(lang, root).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(language = lang, err = %e, "skipping language during collection");
                for f in &files {
                    failed.push(relative_path(f, root));
                }
                continue;
            }
        };
        workspace.wait_for_ready(30).await;
        drop(workspace);

        let mut tasks = Vec::new();
        for file in files {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
            let session = Arc::clone(session);
            let index = Arc::clone(index);
            let root = root.to_path_buf();
            tasks.push(tokio::spawn(async move {
                let result = async {
                    let workspace = session.workspace_for_language(lang, &root).await?;
                    index.file_symbols(&workspace, &root, &file).await
                }
                .await;
                drop(permit);
                (file, result)
            }));
        }

        for task in tasks {
            match task.await {
                Ok((_, Ok(symbols))) => all.push(symbols),
                Ok((file, Err(e))) => {
                    debug!(file = %file.display(), err = %e, "symbol fetch failed");
                    failed.push(relative_path(&file, root));
                }
                Err(_) => {}
            }
        }
    }

    all.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok((all, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    #[allow(deprecated)]
    fn sym(name: &str, kind: lsp_types::SymbolKind, line: u32, children: Vec<DocumentSymbol>) -> DocumentSymbol {
        DocumentSymbol {
            name: name.to_string(),
            detail: None,
            kind,
            tags: None,
            deprecated: None,
            range: Range {
                start: Position { line, character: 0 },
                end: Position { line: line + 10, character: 0 },
            },
            selection_range: Range {
                start: Position { line, character: 4 },
                end: Position { line, character: 8 },
            },
            children: if children.is_empty() { None } else { Some(children) },
        }
    }

    fn sample_tree() -> FileSymbols {
        let tree = vec![sym(
            "Storage",
            lsp_types::SymbolKind::CLASS,
            0,
            vec![
                sym("save", lsp_types::SymbolKind::METHOD, 2, vec![]),
                sym("load", lsp_types::SymbolKind::METHOD, 5, vec![]),
            ],
        )];
        flatten_symbols(&DocumentSymbolResponse::Nested(tree), "src/storage.rs")
    }

    #[test]
    fn flatten_links_parents_by_index() {
        let file = sample_tree();
        assert_eq!(file.entries.len(), 3);
        assert_eq!(file.entries[0].name, "Storage");
        assert_eq!(file.entries[0].parent, None);
        assert_eq!(file.entries[1].parent, Some(0));
        assert_eq!(file.entries[1].container.as_deref(), Some("Storage"));
        assert_eq!(file.container_path(1), vec!["Storage"]);
        assert_eq!(file.entries[1].kind, SymbolKind::Method);
    }

    #[test]
    fn flatten_uses_one_based_lines() {
        let file = sample_tree();
        assert_eq!(file.entries[0].line, 1);
        assert_eq!(file.entries[0].range_start_line, 1);
        assert_eq!(file.entries[0].range_end_line, 11);
        assert_eq!(file.entries[1].line, 3);
    }

    #[test]
    #[allow(deprecated)]
    fn flat_response_keeps_container_name() {
        let flat = vec![SymbolInformation {
            name: "helper".into(),
            kind: lsp_types::SymbolKind::FUNCTION,
            tags: None,
            deprecated: None,
            location: lsp_types::Location {
                uri: "file:///tmp/a.py".parse().unwrap(),
                range: Range {
                    start: Position { line: 9, character: 0 },
                    end: Position { line: 12, character: 0 },
                },
            },
            container_name: Some("utils".into()),
        }];
        let file = flatten_symbols(&DocumentSymbolResponse::Flat(flat), "a.py");
        assert_eq!(file.entries[0].line, 10);
        assert_eq!(file.container_path(0), vec!["utils"]);
    }

    #[tokio::test]
    async fn cache_is_keyed_by_content_hash() {
        let index = SymbolIndex::new(1024 * 1024);
        let file = Arc::new(sample_tree());
        index
            .insert("file:///s.rs".into(), "hash-a".into(), file.clone())
            .await;

        assert!(index.get("file:///s.rs", "hash-a").await.is_some());
        // Same URI, different content: a miss, not a stale hit.
        assert!(index.get("file:///s.rs", "hash-b").await.is_none());
    }

    #[tokio::test]
    async fn lru_evicts_when_over_budget() {
        // Budget fits roughly one sample tree.
        let one = Arc::new(sample_tree());
        let budget = one.approx_bytes() + 16;
        let index = SymbolIndex::new(budget);

        index.insert("file:///a.rs".into(), "h".into(), one.clone()).await;
        index.insert("file:///b.rs".into(), "h".into(), one.clone()).await;

        let info = index.info().await;
        assert!(info.current_bytes <= budget);
        assert_eq!(info.entries, 1);
        // The older key was evicted.
        assert!(index.get("file:///a.rs", "h").await.is_none());
        assert!(index.get("file:///b.rs", "h").await.is_some());
    }

    #[test]
    fn enumerate_skips_unsupported_and_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "plain").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();

        let files = enumerate_source_files(dir.path(), &HashSet::new());
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["main.go"]);
    }

    #[test]
    fn enumerate_honors_excluded_languages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn main() {}").unwrap();

        let excluded: HashSet<String> = ["go".to_string()].into_iter().collect();
        let files = enumerate_source_files(dir.path(), &excluded);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("lib.rs"));
    }
}
