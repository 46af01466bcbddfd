// SPDX-License-Identifier: MIT
//! `grep` — regex search over symbol names across the workspace.
//!
//! Case-insensitive by default. The regex applies to symbol names only;
//! kind filters, a path regex, and exclude patterns narrow the candidate
//! set. Transient per-file failures never abort the aggregate; affected
//! files are reported in the `warning` field.

use std::collections::HashSet;
use std::path::PathBuf;

use regex::Regex;
use tracing::warn;

use leta_proto::{ErrorKind, GrepParams, GrepResult, RpcError, SymbolHit, SymbolKind};

use super::{symbol_docs, HandlerContext};
use crate::index::enumerate_source_files;
use crate::text::{language_id, relative_path};

pub async fn handle_grep(ctx: &HandlerContext, params: GrepParams) -> Result<GrepResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);

    let name_regex = compile_name_regex(&params.pattern, params.case_sensitive)?;
    let path_regex = params
        .path_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| RpcError::new(ErrorKind::UsageError, format!("invalid path pattern: {e}")))?;
    let excludes: Vec<Regex> = params
        .exclude_patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();
    let kinds = parse_kind_filter(params.kinds.as_deref())?;

    let config = ctx.config().await;
    let excluded_languages: HashSet<String> = config
        .workspaces
        .excluded_languages
        .iter()
        .cloned()
        .collect();

    let limit = if params.limit == 0 {
        usize::MAX
    } else {
        params.limit as usize
    };

    let files = enumerate_source_files(&workspace_root, &excluded_languages);

    let mut results: Vec<SymbolHit> = Vec::new();
    let mut failed_files: Vec<String> = Vec::new();
    let mut truncated = false;
    let mut warmed_languages: HashSet<&'static str> = HashSet::new();

    'files: for file in &files {
        let rel_path = relative_path(file, &workspace_root);
        if !file_selected(&rel_path, path_regex.as_ref(), &excludes) {
            continue;
        }

        let lang = language_id(file);
        let workspace = match ctx.session.workspace_for_language(lang, &workspace_root).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(language = lang, err = %e, "grep: server unavailable");
                failed_files.push(rel_path);
                continue;
            }
        };
        if warmed_languages.insert(lang) {
            workspace.wait_for_ready(30).await;
        }

        let symbols = match ctx.symbols.file_symbols(&workspace, &workspace_root, file).await {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(file = %rel_path, err = %e, "grep: symbol fetch failed");
                failed_files.push(rel_path);
                continue;
            }
        };

        let mut matching: Vec<usize> = symbols
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                name_regex.is_match(&entry.name)
                    && kinds.as_ref().map_or(true, |ks| ks.contains(&entry.kind))
            })
            .map(|(idx, _)| idx)
            .collect();
        matching.sort_by_key(|&idx| symbols.entries[idx].line);

        for idx in matching {
            let mut hit = symbols.hit(idx);
            if params.include_docs {
                hit.docs =
                    symbol_docs(ctx, &workspace_root, &hit.path, hit.line, hit.column).await;
            }
            results.push(hit);
            if results.len() >= limit {
                truncated = true;
                break 'files;
            }
        }
    }

    results.sort_by(|a, b| (&a.path, a.line).cmp(&(&b.path, b.line)));

    let mut warnings = Vec::new();
    if results.is_empty() && params.pattern.contains(r"\|") {
        warnings.push(
            "0 symbols matched; '\\|' is a literal bar in this regex dialect — \
             write the alternation unescaped, as in 'foo|bar'"
                .to_string(),
        );
    }
    if !failed_files.is_empty() {
        failed_files.truncate(10);
        warnings.push(format!(
            "some files could not be searched: {}",
            failed_files.join(", ")
        ));
    }

    Ok(GrepResult {
        symbols: results,
        truncated,
        warning: if warnings.is_empty() {
            None
        } else {
            Some(warnings.join("\n"))
        },
    })
}

fn compile_name_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, RpcError> {
    let source = if case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&source)
        .map_err(|e| RpcError::new(ErrorKind::UsageError, format!("invalid regex '{pattern}': {e}")))
}

/// Kind names from the CLI, parsed strictly: an unknown kind is a usage
/// error rather than a silent zero-match filter.
fn parse_kind_filter(kinds: Option<&[String]>) -> Result<Option<HashSet<SymbolKind>>, RpcError> {
    let Some(kinds) = kinds else {
        return Ok(None);
    };
    let mut parsed = HashSet::new();
    for kind in kinds {
        let kind: SymbolKind = kind
            .parse()
            .map_err(|e: String| RpcError::new(ErrorKind::UsageError, e))?;
        parsed.insert(kind);
    }
    Ok(Some(parsed))
}

fn file_selected(rel_path: &str, path_regex: Option<&Regex>, excludes: &[Regex]) -> bool {
    if excludes.iter().any(|re| re.is_match(rel_path)) {
        return false;
    }
    path_regex.map_or(true, |re| re.is_match(rel_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_regex_is_case_insensitive_by_default() {
        let re = compile_name_regex("handler$", false).unwrap();
        assert!(re.is_match("AuthHandler"));
        let strict = compile_name_regex("handler$", true).unwrap();
        assert!(!strict.is_match("AuthHandler"));
    }

    #[test]
    fn bad_regex_is_a_usage_error() {
        let err = compile_name_regex("[unclosed", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UsageError);
    }

    #[test]
    fn kind_filter_parses_strictly() {
        let kinds = parse_kind_filter(Some(&["class".to_string(), "Struct".to_string()]))
            .unwrap()
            .unwrap();
        assert!(kinds.contains(&SymbolKind::Class));
        assert!(kinds.contains(&SymbolKind::Struct));

        let err = parse_kind_filter(Some(&["widget".to_string()])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UsageError);

        assert!(parse_kind_filter(None).unwrap().is_none());
    }

    #[test]
    fn file_selection_applies_excludes_before_path_filter() {
        let path_re = Regex::new("^src/").unwrap();
        let excludes = vec![Regex::new("generated").unwrap()];

        assert!(file_selected("src/lib.rs", Some(&path_re), &excludes));
        assert!(!file_selected("src/generated/api.rs", Some(&path_re), &excludes));
        assert!(!file_selected("tests/lib.rs", Some(&path_re), &excludes));
        assert!(file_selected("anything.rs", None, &[]));
    }
}
