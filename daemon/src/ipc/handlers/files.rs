// SPDX-License-Identifier: MIT
//! `files` — source tree listing with per-file size, line, and
//! symbol-kind counts.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use globset::Glob;
use tracing::debug;

use leta_proto::{FileInfo, FilesParams, FilesResult, RpcError};

use super::HandlerContext;
use crate::index::enumerate_source_files;
use crate::text::{language_id, read_file_content, relative_path};

pub async fn handle_files(
    ctx: &HandlerContext,
    params: FilesParams,
) -> Result<FilesResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let target = params
        .subpath
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| workspace_root.clone());

    let config = ctx.config().await;
    let excluded_languages: HashSet<String> = config
        .workspaces
        .excluded_languages
        .iter()
        .cloned()
        .collect();

    let exclude_matchers: Vec<globset::GlobMatcher> = params
        .exclude_patterns
        .iter()
        .filter_map(|p| Glob::new(p).ok().map(|g| g.compile_matcher()))
        .collect();
    let filter_matchers: Vec<globset::GlobMatcher> = params
        .filter_patterns
        .iter()
        .filter_map(|p| Glob::new(p).ok().map(|g| g.compile_matcher()))
        .collect();

    let mut paths = enumerate_source_files(&target, &excluded_languages);
    // `-i` re-includes directories the default walk skips (node_modules,
    // target, dotted dirs, …).
    for pattern in &params.include_patterns {
        let dir = target.join(pattern);
        if !dir.is_dir() {
            continue;
        }
        for entry in ignore::WalkBuilder::new(&dir)
            .hidden(false)
            .git_ignore(false)
            .build()
            .flatten()
        {
            let path = entry.path();
            if path.is_file() && language_id(path) != "plaintext" {
                paths.push(path.to_path_buf());
            }
        }
    }
    paths.sort();
    paths.dedup();

    let mut files: BTreeMap<String, FileInfo> = BTreeMap::new();
    let mut total_bytes = 0u64;
    let mut total_lines = 0u32;

    for path in paths {
        let rel_path = relative_path(&path, &workspace_root);
        if is_excluded(&rel_path, &exclude_matchers, &params.exclude_patterns) {
            continue;
        }
        if !filter_matchers.is_empty() {
            let filename = Path::new(&rel_path)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            let selected = filter_matchers
                .iter()
                .any(|m| m.is_match(&rel_path) || m.is_match(&filename));
            if !selected {
                continue;
            }
        }

        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let lines = read_file_content(&path)
            .map(|c| c.lines().count() as u32)
            .unwrap_or(0);

        total_bytes += metadata.len();
        total_lines += lines;
        files.insert(
            rel_path.clone(),
            FileInfo {
                path: rel_path,
                lines,
                bytes: metadata.len(),
                symbols: BTreeMap::new(),
            },
        );
    }

    // Decorate with symbol-kind counts; failures leave the counts empty.
    let paths: Vec<String> = files.keys().cloned().collect();
    for rel_path in paths {
        let abs = workspace_root.join(&rel_path);
        let lang = language_id(&abs);
        let workspace = match ctx.session.workspace_for_language(lang, &workspace_root).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(language = lang, err = %e, "files: skipping symbol counts");
                continue;
            }
        };
        if let Ok(symbols) = ctx.symbols.file_symbols(&workspace, &workspace_root, &abs).await {
            let mut counts: BTreeMap<String, u32> = BTreeMap::new();
            for entry in &symbols.entries {
                *counts
                    .entry(entry.kind.as_str().to_lowercase())
                    .or_insert(0) += 1;
            }
            if let Some(info) = files.get_mut(&rel_path) {
                info.symbols = counts;
            }
        }
    }

    Ok(FilesResult {
        total_files: files.len() as u32,
        total_bytes,
        total_lines,
        files,
    })
}

fn is_excluded(
    rel_path: &str,
    matchers: &[globset::GlobMatcher],
    raw_patterns: &[String],
) -> bool {
    if matchers.iter().any(|m| m.is_match(rel_path)) {
        return true;
    }
    // Bare directory or file names exclude any path containing them as a
    // component.
    let components: Vec<&str> = Path::new(rel_path)
        .iter()
        .filter_map(|c| c.to_str())
        .collect();
    raw_patterns
        .iter()
        .any(|p| !p.contains('/') && !p.contains('*') && components.contains(&p.as_str()))
}
