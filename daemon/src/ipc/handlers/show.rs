// SPDX-License-Identifier: MIT
//! `show` — print a symbol's full body with an anchor header.
//!
//! The body spans the symbol's selection-range start line through the end
//! of its enclosing range. When the resolver already supplied the range it
//! is used directly; otherwise the file's symbol tree is consulted for the
//! deepest symbol enclosing the target line.

use std::path::PathBuf;

use leta_proto::{RpcError, ShowParams, ShowResult, SymbolKind};

use super::{io_error, HandlerContext};
use crate::text::{read_file_content, relative_path};

const DEFAULT_HEAD: u32 = 200;

pub async fn handle_show(ctx: &HandlerContext, params: ShowParams) -> Result<ShowResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let file_path = PathBuf::from(&params.path);
    let head = params.head.unwrap_or(DEFAULT_HEAD);

    let content = read_file_content(&file_path).map_err(io_error)?;
    let lines: Vec<&str> = content.lines().collect();
    let rel_path = relative_path(&file_path, &workspace_root);

    // 0-based inclusive line window.
    let (mut start, mut end) = match (params.range_start_line, params.range_end_line) {
        (Some(range_start), Some(range_end)) => {
            let start = range_start.saturating_sub(1) as usize;
            let mut end = range_end.saturating_sub(1) as usize;
            // Single-line ranges for constants often hide a multi-line
            // initializer; extend across unbalanced brackets.
            if start == end
                && matches!(params.kind, Some(SymbolKind::Constant) | Some(SymbolKind::Variable))
            {
                end = extend_over_initializer(&lines, start);
            }
            (start, end)
        }
        _ => {
            let target = params.line.saturating_sub(1) as usize;
            let workspace = ctx
                .session
                .workspace_for_file(&file_path, &workspace_root)
                .await?;
            let symbols = ctx
                .symbols
                .file_symbols(&workspace, &workspace_root, &file_path)
                .await?;
            enclosing_range(&symbols, target).unwrap_or((target, target))
        }
    };

    if params.context > 0 {
        start = start.saturating_sub(params.context as usize);
        end = (end + params.context as usize).min(lines.len().saturating_sub(1));
    }
    end = end.min(lines.len().saturating_sub(1));

    let total_lines = (end.saturating_sub(start) + 1) as u32;
    let truncated = head > 0 && total_lines > head;
    if truncated {
        end = start + head as usize - 1;
    }

    let body = if lines.is_empty() {
        String::new()
    } else {
        lines[start..=end.min(lines.len() - 1)].join("\n")
    };

    Ok(ShowResult {
        path: rel_path,
        start_line: start as u32 + 1,
        end_line: end as u32 + 1,
        content: body,
        symbol: params.symbol,
        truncated,
        total_lines: if truncated { Some(total_lines) } else { None },
    })
}

/// Deepest symbol whose range encloses `target` (0-based). Entries are in
/// pre-order, so the last enclosing entry is the deepest.
fn enclosing_range(symbols: &crate::index::FileSymbols, target: usize) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for entry in &symbols.entries {
        let start = entry.range_start_line.saturating_sub(1) as usize;
        let end = entry.range_end_line.saturating_sub(1) as usize;
        if start <= target && target <= end {
            best = Some((start, end));
        }
    }
    best
}

/// Walk forward from `start` until parentheses, brackets, and braces are
/// balanced again. Tracks triple-quoted strings so Python literals close
/// properly.
fn extend_over_initializer(lines: &[&str], start: usize) -> usize {
    if start >= lines.len() {
        return start;
    }

    let count = |line: &str, open: char, close: char| {
        line.matches(open).count() as i32 - line.matches(close).count() as i32
    };

    let first = lines[start];
    let mut parens = count(first, '(', ')');
    let mut brackets = count(first, '[', ']');
    let mut braces = count(first, '{', '}');
    let mut in_triple = first.matches("\"\"\"").count() % 2 == 1 || first.matches("'''").count() % 2 == 1;

    if parens == 0 && brackets == 0 && braces == 0 && !in_triple {
        return start;
    }

    for (i, line) in lines.iter().enumerate().skip(start + 1) {
        if in_triple {
            if line.contains("\"\"\"") || line.contains("'''") {
                in_triple = false;
                if parens <= 0 && brackets <= 0 && braces <= 0 {
                    return i;
                }
            }
            continue;
        }

        parens += count(line, '(', ')');
        brackets += count(line, '[', ']');
        braces += count(line, '{', '}');

        if line.matches("\"\"\"").count() % 2 == 1 || line.matches("'''").count() % 2 == 1 {
            in_triple = true;
            continue;
        }

        if parens <= 0 && brackets <= 0 && braces <= 0 {
            return i;
        }
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializer_extension_stops_at_balance() {
        let lines = vec!["CONFIG = {", "    'a': 1,", "    'b': 2,", "}", "x = 1"];
        assert_eq!(extend_over_initializer(&lines, 0), 3);
    }

    #[test]
    fn balanced_single_line_does_not_extend() {
        let lines = vec!["MAX = 10", "y = 2"];
        assert_eq!(extend_over_initializer(&lines, 0), 0);
    }

    #[test]
    fn triple_quoted_string_extends_to_close() {
        let lines = vec!["DOC = \"\"\"", "text", "\"\"\"", "z = 3"];
        assert_eq!(extend_over_initializer(&lines, 0), 2);
    }
}
