// SPDX-License-Identifier: MIT
//! Symbol expression resolution.
//!
//! Grammar: `(path ':')? (line ':')? IDENT ('.' IDENT)*`. The path filter
//! is a substring of the workspace-relative path, or a glob when it
//! contains `*`/`?`. The line filter matches the symbol's selection-range
//! start (1-based). The qualified name matches against the tail of the
//! symbol's container path plus its own name.
//!
//! Symbol names come back from servers in language-specific spellings —
//! `(*Recv).Method` from gopls, `name(args)` from clangd, `Class:method`
//! from lua-language-server, `impl Trait for Type` containers from
//! rust-analyzer — so names and containers are normalized before matching.

use std::path::Path;
use std::sync::Arc;

use globset::Glob;
use once_cell::sync::Lazy;
use regex::Regex;

use leta_proto::{ResolvedSymbol, SymbolHit};

use crate::index::FileSymbols;

const MAX_AMBIGUOUS_CANDIDATES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolExpr {
    pub path_filter: Option<String>,
    pub line_filter: Option<u32>,
    pub name_parts: Vec<String>,
}

#[derive(Debug)]
pub enum ResolveError {
    Usage(String),
    NotFound(String),
    Ambiguous {
        detail: String,
        candidates: Vec<SymbolHit>,
    },
}

/// Parse a symbol expression into its filters and qualified-name parts.
pub fn parse_expr(expr: &str) -> Result<SymbolExpr, ResolveError> {
    if expr.trim().is_empty() {
        return Err(ResolveError::Usage("empty symbol expression".into()));
    }

    let segments: Vec<&str> = expr.split(':').collect();
    let (path_filter, line_filter, name) = match segments.len() {
        1 => (None, None, segments[0]),
        2 => (Some(segments[0].to_string()), None, segments[1]),
        3 => {
            let line: u32 = segments[1].parse().map_err(|_| {
                ResolveError::Usage(format!("invalid line number: '{}'", segments[1]))
            })?;
            (Some(segments[0].to_string()), Some(line), segments[2])
        }
        _ => {
            return Err(ResolveError::Usage(format!(
                "invalid symbol expression: '{expr}'"
            )))
        }
    };

    let name_parts: Vec<String> = name.split('.').map(str::to_string).collect();
    if name_parts.iter().any(|p| p.is_empty()) {
        return Err(ResolveError::Usage(format!("invalid symbol name: '{name}'")));
    }

    Ok(SymbolExpr {
        path_filter,
        line_filter,
        name_parts,
    })
}

/// Resolve `expr` against collected file symbol trees. Returns the unique
/// match, or `NotFound` / `Ambiguous` (with re-invocable references).
pub fn resolve(
    expr: &str,
    files: &[Arc<FileSymbols>],
    workspace_root: &Path,
) -> Result<ResolvedSymbol, ResolveError> {
    let parsed = parse_expr(expr)?;
    let matches = find_matches(&parsed, files);

    if matches.is_empty() {
        let mut detail = format!("Symbol '{}' not found", parsed.name_parts.join("."));
        if let Some(pf) = &parsed.path_filter {
            detail.push_str(&format!(" in files matching '{pf}'"));
        }
        if let Some(line) = parsed.line_filter {
            detail.push_str(&format!(" on line {line}"));
        }
        return Err(ResolveError::NotFound(detail));
    }

    // When the name collides between a type and its backing variable or
    // field, a single type-like candidate wins outright.
    let finalists: Vec<Candidate<'_>> = {
        let type_like: Vec<Candidate<'_>> = matches
            .iter()
            .filter(|c| c.entry().kind.is_type_like())
            .cloned()
            .collect();
        if type_like.len() == 1 && matches.len() > 1 {
            type_like
        } else {
            matches.clone()
        }
    };

    if finalists.len() == 1 {
        let c = &finalists[0];
        let entry = c.entry();
        return Ok(ResolvedSymbol {
            path: workspace_root
                .join(&c.file.rel_path)
                .to_string_lossy()
                .to_string(),
            line: entry.line,
            column: entry.column,
            name: entry.name.clone(),
            kind: entry.kind,
            container: entry.container.clone(),
            range_start_line: Some(entry.range_start_line),
            range_end_line: Some(entry.range_end_line),
        });
    }

    let target = parsed.name_parts.last().expect("non-empty parts");
    let candidates: Vec<SymbolHit> = finalists
        .iter()
        .take(MAX_AMBIGUOUS_CANDIDATES)
        .map(|c| {
            let mut hit = c.file.hit(c.idx);
            hit.docs = None;
            hit.range_start_line = None;
            hit.range_end_line = None;
            hit.reference = Some(unambiguous_reference(c, &finalists, target));
            hit
        })
        .collect();

    Err(ResolveError::Ambiguous {
        detail: format!(
            "Symbol '{}' is ambiguous ({} matches)",
            parsed.name_parts.join("."),
            finalists.len()
        ),
        candidates,
    })
}

// ─── Candidate enumeration ───────────────────────────────────────────────────

#[derive(Clone)]
struct Candidate<'a> {
    file: &'a Arc<FileSymbols>,
    idx: usize,
}

impl Candidate<'_> {
    fn entry(&self) -> &crate::index::SymbolEntry {
        &self.file.entries[self.idx]
    }
}

fn find_matches<'a>(expr: &SymbolExpr, files: &'a [Arc<FileSymbols>]) -> Vec<Candidate<'a>> {
    let path_matcher = expr.path_filter.as_deref().map(PathMatcher::new);

    let mut out = Vec::new();
    for file in files {
        if let Some(matcher) = &path_matcher {
            if !matcher.matches(&file.rel_path) {
                continue;
            }
        }
        for idx in 0..file.entries.len() {
            let entry = &file.entries[idx];
            if let Some(line) = expr.line_filter {
                if entry.line != line {
                    continue;
                }
            }
            if matches_qualified_name(expr, file, idx) {
                out.push(Candidate { file, idx });
            }
        }
    }
    out
}

struct PathMatcher {
    raw: String,
    glob: Option<globset::GlobMatcher>,
}

impl PathMatcher {
    fn new(filter: &str) -> Self {
        let glob = if filter.contains('*') || filter.contains('?') {
            Glob::new(filter).ok().map(|g| g.compile_matcher())
        } else {
            None
        };
        Self {
            raw: filter.to_string(),
            glob,
        }
    }

    fn matches(&self, rel_path: &str) -> bool {
        match &self.glob {
            Some(glob) => {
                glob.is_match(rel_path)
                    || Path::new(rel_path)
                        .file_name()
                        .map(|f| glob.is_match(f))
                        .unwrap_or(false)
            }
            None => rel_path.contains(&self.raw),
        }
    }
}

fn matches_qualified_name(expr: &SymbolExpr, file: &FileSymbols, idx: usize) -> bool {
    let entry = &file.entries[idx];
    let target = expr.name_parts.last().expect("non-empty parts");

    if expr.name_parts.len() == 1 {
        return name_matches(&entry.name, target);
    }

    let wanted_containers = &expr.name_parts[..expr.name_parts.len() - 1];

    // Go spellings carry the receiver in the name itself.
    if let Some((receiver, method)) = split_go_method(&entry.name) {
        if method == *target && strip_generics(&receiver) == wanted_containers.join(".") {
            return true;
        }
    }
    // Lua methods come back as `Class:method`.
    if entry.name == format!("{}:{}", wanted_containers.join("."), target) {
        return true;
    }
    // Some servers return the fully qualified name directly.
    if entry.name == expr.name_parts.join(".") {
        return true;
    }

    if !name_matches(&entry.name, target) {
        return false;
    }

    // Tail of (container path + name), with container normalization.
    let chain: Vec<String> = file
        .container_path(idx)
        .iter()
        .map(|c| strip_generics(&normalize_container(c)))
        .filter(|c| !c.is_empty())
        .collect();

    if chain_tail_matches(&chain, wanted_containers) {
        return true;
    }

    // Fall back to treating the file stem as an implicit module container
    // (Python and TypeScript callers often write `module.Name`).
    let module = Path::new(&file.rel_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    let mut with_module = vec![module];
    with_module.extend(chain);
    chain_tail_matches(&with_module, wanted_containers)
}

fn chain_tail_matches(chain: &[String], wanted: &[String]) -> bool {
    if wanted.len() > chain.len() {
        return false;
    }
    chain[chain.len() - wanted.len()..]
        .iter()
        .zip(wanted)
        .all(|(have, want)| have == want)
}

// ─── Name normalization ──────────────────────────────────────────────────────

static CPP_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\([^)]*\)$").expect("static regex"));
static GO_METHOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\*?([^)]+)\)\.(\w+)$").expect("static regex"));
static RECEIVER_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\*?(\w+)\)$").expect("static regex"));
static IMPL_FOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^impl\s+\w+(?:<[^>]+>)?\s+for\s+(\w+)").expect("static regex"));
static IMPL_PLAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^impl\s+(\w+)").expect("static regex"));

fn name_matches(symbol_name: &str, target: &str) -> bool {
    symbol_name == target || normalize_symbol_name(symbol_name) == target
}

/// Reduce a server's symbol spelling to the bare identifier.
pub fn normalize_symbol_name(name: &str) -> String {
    if let Some(caps) = CPP_CALL.captures(name) {
        return caps[1].to_string();
    }
    if let Some(caps) = GO_METHOD.captures(name) {
        return caps[2].to_string();
    }
    if let Some((_, method)) = name.rsplit_once(':') {
        return method.to_string();
    }
    name.to_string()
}

fn split_go_method(name: &str) -> Option<(String, String)> {
    let caps = GO_METHOD.captures(name)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

fn strip_generics(name: &str) -> String {
    match name.find(['[', '<']) {
        Some(idx) => name[..idx].to_string(),
        None => name.to_string(),
    }
}

/// Reduce a container spelling to the type name: `(*Recv)` → `Recv`,
/// `impl Display for Config` → `Config`, `impl Config` → `Config`.
pub fn normalize_container(container: &str) -> String {
    if let Some(caps) = RECEIVER_ONLY.captures(container) {
        return caps[1].to_string();
    }
    if let Some(caps) = IMPL_FOR.captures(container) {
        return caps[1].to_string();
    }
    if let Some(caps) = IMPL_PLAIN.captures(container) {
        return caps[1].to_string();
    }
    container.to_string()
}

// ─── Unambiguous references ──────────────────────────────────────────────────

fn effective_container(c: &Candidate<'_>) -> String {
    if let Some(container) = &c.entry().container {
        if !container.is_empty() {
            return strip_generics(&normalize_container(container));
        }
    }
    if let Some((receiver, _)) = split_go_method(&c.entry().name) {
        return strip_generics(&receiver);
    }
    String::new()
}

/// Build the shortest expression that selects `c` uniquely among
/// `all`: container.name, then file:name, then file:container.name, then
/// file:line:name.
fn unambiguous_reference(c: &Candidate<'_>, all: &[Candidate<'_>], target: &str) -> String {
    let filename = Path::new(&c.file.rel_path)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("")
        .to_string();
    let name = normalize_symbol_name(target);
    let container = effective_container(c);

    let mut attempts = Vec::new();
    if !container.is_empty() {
        attempts.push(format!("{container}.{name}"));
    }
    attempts.push(format!("{filename}:{name}"));
    if !container.is_empty() {
        attempts.push(format!("{filename}:{container}.{name}"));
    }

    for attempt in attempts {
        if selects_uniquely(&attempt, c, all) {
            return attempt;
        }
    }
    format!("{}:{}:{}", filename, c.entry().line, name)
}

fn selects_uniquely(reference: &str, target: &Candidate<'_>, all: &[Candidate<'_>]) -> bool {
    let Ok(parsed) = parse_expr(reference) else {
        return false;
    };

    let selected: Vec<&Candidate<'_>> = all
        .iter()
        .filter(|c| {
            if let Some(pf) = &parsed.path_filter {
                let filename = Path::new(&c.file.rel_path)
                    .file_name()
                    .and_then(|f| f.to_str())
                    .unwrap_or("");
                if filename != pf {
                    return false;
                }
            }
            if let Some(line) = parsed.line_filter {
                if c.entry().line != line {
                    return false;
                }
            }
            let name = parsed.name_parts.last().expect("non-empty parts");
            if normalize_symbol_name(&c.entry().name) != *name {
                return false;
            }
            if parsed.name_parts.len() > 1 {
                let wanted = parsed.name_parts[..parsed.name_parts.len() - 1].join(".");
                if effective_container(c) != wanted {
                    return false;
                }
            }
            true
        })
        .collect();

    selected.len() == 1
        && selected[0].file.rel_path == target.file.rel_path
        && selected[0].idx == target.idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SymbolEntry;
    use leta_proto::SymbolKind;

    fn entry(
        name: &str,
        kind: SymbolKind,
        parent: Option<usize>,
        container: Option<&str>,
        line: u32,
    ) -> SymbolEntry {
        SymbolEntry {
            name: name.to_string(),
            kind,
            detail: None,
            parent,
            container: container.map(str::to_string),
            line,
            column: 4,
            range_start_line: line,
            range_end_line: line + 5,
        }
    }

    fn file(rel_path: &str, entries: Vec<SymbolEntry>) -> Arc<FileSymbols> {
        Arc::new(FileSymbols {
            rel_path: rel_path.to_string(),
            entries,
        })
    }

    fn fixture() -> Vec<Arc<FileSymbols>> {
        vec![
            file(
                "src/storage.rs",
                vec![
                    entry("Storage", SymbolKind::Struct, None, None, 1),
                    entry("save", SymbolKind::Method, Some(0), Some("Storage"), 4),
                    entry("storage", SymbolKind::Variable, None, None, 40),
                ],
            ),
            file(
                "src/backup.rs",
                vec![
                    entry("Backup", SymbolKind::Struct, None, None, 1),
                    entry("save", SymbolKind::Method, Some(0), Some("Backup"), 8),
                ],
            ),
            file(
                "main.go",
                vec![entry("(*Result[T]).IsOk", SymbolKind::Method, None, None, 12)],
            ),
        ]
    }

    #[test]
    fn parse_plain_name() {
        let e = parse_expr("Storage").unwrap();
        assert_eq!(e.path_filter, None);
        assert_eq!(e.line_filter, None);
        assert_eq!(e.name_parts, vec!["Storage"]);
    }

    #[test]
    fn parse_qualified_name() {
        let e = parse_expr("Storage.save").unwrap();
        assert_eq!(e.name_parts, vec!["Storage", "save"]);
    }

    #[test]
    fn parse_path_and_line_filters() {
        let e = parse_expr("storage.rs:save").unwrap();
        assert_eq!(e.path_filter.as_deref(), Some("storage.rs"));
        assert_eq!(e.line_filter, None);

        let e = parse_expr("storage.rs:4:save").unwrap();
        assert_eq!(e.path_filter.as_deref(), Some("storage.rs"));
        assert_eq!(e.line_filter, Some(4));
        assert_eq!(e.name_parts, vec!["save"]);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse_expr(""), Err(ResolveError::Usage(_))));
        assert!(matches!(parse_expr("a:b:c:d"), Err(ResolveError::Usage(_))));
        assert!(matches!(
            parse_expr("file.rs:xx:name"),
            Err(ResolveError::Usage(_))
        ));
        assert!(matches!(parse_expr("a..b"), Err(ResolveError::Usage(_))));
    }

    #[test]
    fn unique_name_resolves() {
        let files = fixture();
        let resolved = resolve("Backup", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.name, "Backup");
        assert_eq!(resolved.path, "/w/src/backup.rs");
        assert_eq!(resolved.line, 1);
        assert_eq!(resolved.kind, SymbolKind::Struct);
    }

    #[test]
    fn qualified_name_disambiguates_methods() {
        let files = fixture();
        let resolved = resolve("Backup.save", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.path, "/w/src/backup.rs");
        assert_eq!(resolved.line, 8);
    }

    #[test]
    fn ambiguous_method_lists_candidates_with_references() {
        let files = fixture();
        match resolve("save", &files, Path::new("/w")) {
            Err(ResolveError::Ambiguous { detail, candidates }) => {
                assert!(detail.contains("'save' is ambiguous"));
                assert_eq!(candidates.len(), 2);
                let refs: Vec<_> = candidates
                    .iter()
                    .map(|c| c.reference.clone().unwrap())
                    .collect();
                assert!(refs.contains(&"Storage.save".to_string()));
                assert!(refs.contains(&"Backup.save".to_string()));
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn type_preferred_over_backing_variable() {
        let files = fixture();
        // "Storage" (struct) and "storage" (variable) both exist; the exact
        // name match selects the struct without ambiguity. A true collision:
        let files2 = vec![file(
            "src/a.rs",
            vec![
                entry("Config", SymbolKind::Struct, None, None, 1),
                entry("Config", SymbolKind::Constant, None, None, 30),
            ],
        )];
        let resolved = resolve("Config", &files2, Path::new("/w")).unwrap();
        assert_eq!(resolved.kind, SymbolKind::Struct);
        assert_eq!(resolved.line, 1);

        let resolved = resolve("Storage", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.kind, SymbolKind::Struct);
    }

    #[test]
    fn path_filter_narrows_matches() {
        let files = fixture();
        let resolved = resolve("backup.rs:save", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.path, "/w/src/backup.rs");
    }

    #[test]
    fn path_filter_supports_globs() {
        let files = fixture();
        let resolved = resolve("*backup*:save", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.path, "/w/src/backup.rs");
    }

    #[test]
    fn line_filter_selects_by_selection_start() {
        let files = fixture();
        let resolved = resolve("storage.rs:4:save", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.line, 4);
        assert!(matches!(
            resolve("storage.rs:5:save", &files, Path::new("/w")),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn zero_match_path_filter_is_not_found_not_ambiguous() {
        let files = fixture();
        match resolve("nonexistent.rs:save", &files, Path::new("/w")) {
            Err(ResolveError::NotFound(detail)) => {
                assert!(detail.contains("nonexistent.rs"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn go_method_spelling_matches_qualified_expr() {
        let files = fixture();
        let resolved = resolve("Result.IsOk", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.path, "/w/main.go");
        assert_eq!(resolved.line, 12);
    }

    #[test]
    fn go_method_spelling_matches_bare_name() {
        let files = fixture();
        let resolved = resolve("IsOk", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.line, 12);
    }

    #[test]
    fn module_name_acts_as_container() {
        let files = vec![file(
            "utils.py",
            vec![entry("helper", SymbolKind::Function, None, None, 3)],
        )];
        let resolved = resolve("utils.helper", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.line, 3);
    }

    #[test]
    fn rust_impl_container_normalizes() {
        let files = vec![file(
            "src/config.rs",
            vec![
                entry("Config", SymbolKind::Struct, None, None, 1),
                entry(
                    "fmt",
                    SymbolKind::Method,
                    None,
                    Some("impl Display for Config"),
                    20,
                ),
            ],
        )];
        let resolved = resolve("Config.fmt", &files, Path::new("/w")).unwrap();
        assert_eq!(resolved.line, 20);
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_symbol_name("run(int, char)"), "run");
        assert_eq!(normalize_symbol_name("(*Server).Start"), "Start");
        assert_eq!(normalize_symbol_name("Account:deposit"), "deposit");
        assert_eq!(normalize_symbol_name("plain"), "plain");
        assert_eq!(normalize_container("(*Server)"), "Server");
        assert_eq!(normalize_container("impl Display for Config"), "Config");
        assert_eq!(normalize_container("impl Config"), "Config");
        assert_eq!(strip_generics("Result[T]"), "Result");
        assert_eq!(strip_generics("Vec<u8>"), "Vec");
    }
}
