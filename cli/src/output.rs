// SPDX-License-Identifier: MIT
//! Plain-text renderers for operation results. JSON output bypasses all of
//! this — `--json` pretty-prints the payload as-is.

use std::collections::BTreeMap;

use leta_proto::{
    CallNode, CallsResult, DescribeResult, DiagnosticsResult, FileInfo, FilesResult, GrepResult,
    LocationsResult, RpcError, ShowResult, SymbolHit,
};

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

fn symbol_line(hit: &SymbolHit) -> String {
    let container = hit
        .container
        .as_ref()
        .map(|c| format!(" in {c}"))
        .unwrap_or_default();
    format!(
        "{}:{} [{}] {}{}",
        hit.path, hit.line, hit.kind, hit.name, container
    )
}

pub fn format_grep(result: &GrepResult, include_docs: bool) -> String {
    let mut lines = Vec::new();
    for hit in &result.symbols {
        lines.push(symbol_line(hit));
        if include_docs {
            if let Some(docs) = &hit.docs {
                for doc_line in docs.lines().take(3) {
                    lines.push(format!("    {doc_line}"));
                }
            }
        }
    }
    if result.truncated {
        lines.push("(truncated; raise --head to see more)".to_string());
    }
    if let Some(warning) = &result.warning {
        lines.push(String::new());
        lines.push(format!("Warning: {warning}"));
    }
    lines.join("\n")
}

pub fn format_show(result: &ShowResult) -> String {
    let mut lines = vec![format!(
        "{}:{}-{}",
        result.path, result.start_line, result.end_line
    )];
    if result.truncated {
        if let Some(total) = result.total_lines {
            lines.push(format!(
                "(truncated, showing {} of {} lines)",
                result.end_line - result.start_line + 1,
                total
            ));
        }
    }
    lines.push(String::new());
    lines.push(result.content.clone());
    lines.join("\n")
}

pub fn format_locations(result: &LocationsResult) -> String {
    let mut lines = Vec::new();
    for loc in &result.locations {
        let name = loc
            .name
            .as_ref()
            .map(|n| {
                let kind = loc
                    .kind
                    .map(|k| format!("[{k}] "))
                    .unwrap_or_default();
                format!(" {kind}{n}")
            })
            .unwrap_or_default();
        lines.push(format!("{}:{}{}", loc.path, loc.line, name));
        if let Some(context) = &loc.context_lines {
            lines.extend(context.iter().cloned());
            lines.push(String::new());
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    if let Some(warning) = &result.warning {
        lines.push(format!("Warning: {warning}"));
    }
    lines.join("\n")
}

pub fn format_calls(result: &CallsResult) -> String {
    if let Some(message) = &result.message {
        return message.clone();
    }

    let mut lines = Vec::new();
    if let Some(path) = &result.path {
        lines.push("Call path found:".to_string());
        for (depth, node) in path.iter().enumerate() {
            lines.push(format!(
                "{}{}:{} {}",
                "  ".repeat(depth),
                node.path,
                node.line,
                node.name
            ));
        }
    } else if let Some(root) = &result.root {
        render_call_node(root, "", true, &mut lines);
    }
    lines.join("\n")
}

fn render_call_node(node: &CallNode, prefix: &str, is_last: bool, lines: &mut Vec<String>) {
    let connector = if prefix.is_empty() {
        ""
    } else if is_last {
        "└── "
    } else {
        "├── "
    };
    lines.push(format!(
        "{prefix}{connector}{}:{} {}",
        node.path, node.line, node.name
    ));

    let child_prefix = if prefix.is_empty() {
        String::new()
    } else if is_last {
        format!("{prefix}    ")
    } else {
        format!("{prefix}│   ")
    };

    if let Some(children) = &node.children {
        for (i, child) in children.iter().enumerate() {
            let last = i == children.len() - 1;
            // Children of the root need a prefix to hang the connectors on.
            let effective_prefix = if prefix.is_empty() {
                "  ".to_string()
            } else {
                child_prefix.clone()
            };
            render_call_node(child, &effective_prefix, last, lines);
        }
    }
}

pub fn format_files(result: &FilesResult) -> String {
    let mut lines = Vec::new();
    render_file_tree(&result.files, "", "", &mut lines);
    lines.push(format!(
        "\n{} files, {}, {} lines",
        result.total_files,
        format_size(result.total_bytes),
        result.total_lines
    ));
    lines.join("\n")
}

fn render_file_tree(
    files: &BTreeMap<String, FileInfo>,
    prefix: &str,
    base: &str,
    lines: &mut Vec<String>,
) {
    // Immediate children of `base`: plain files and sub-directories.
    let mut dirs: Vec<String> = Vec::new();
    let mut entries: Vec<(&String, &FileInfo)> = Vec::new();

    for (path, info) in files {
        let relative = path
            .strip_prefix(base)
            .unwrap_or(path)
            .trim_start_matches('/');
        match relative.split_once('/') {
            None => entries.push((path, info)),
            Some((dir, _)) => {
                let dir = dir.to_string();
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
    }

    let mut names: Vec<(String, Option<&FileInfo>)> = entries
        .iter()
        .map(|(path, info)| {
            let name = path
                .strip_prefix(base)
                .unwrap_or(path)
                .trim_start_matches('/')
                .to_string();
            (name, Some(*info))
        })
        .collect();
    names.extend(dirs.into_iter().map(|d| (d, None)));
    names.sort_by(|a, b| a.0.cmp(&b.0));

    for (i, (name, info)) in names.iter().enumerate() {
        let is_last = i == names.len() - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };

        match info {
            Some(info) => {
                let symbols: Vec<String> = info
                    .symbols
                    .iter()
                    .filter(|(_, &count)| count > 0)
                    .map(|(kind, count)| format!("{count} {kind}"))
                    .collect();
                let symbols = if symbols.is_empty() {
                    String::new()
                } else {
                    format!(", {}", symbols.join(", "))
                };
                lines.push(format!(
                    "{prefix}{connector}{name} ({}, {} lines{symbols})",
                    format_size(info.bytes),
                    info.lines
                ));
            }
            None => {
                lines.push(format!("{prefix}{connector}{name}"));
                let new_base = if base.is_empty() {
                    name.clone()
                } else {
                    format!("{base}/{name}")
                };
                let sub: BTreeMap<String, FileInfo> = files
                    .iter()
                    .filter(|(p, _)| p.starts_with(&format!("{new_base}/")))
                    .map(|(p, f)| (p.clone(), f.clone()))
                    .collect();
                render_file_tree(&sub, &format!("{prefix}{child_prefix}"), &new_base, lines);
            }
        }
    }
}

pub fn format_diagnostics(result: &DiagnosticsResult) -> String {
    let mut lines = Vec::new();
    for d in &result.diagnostics {
        let source = d
            .source
            .as_ref()
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        lines.push(format!(
            "{}:{}:{} {}{}: {}",
            d.path,
            d.line,
            d.column,
            d.severity.as_str(),
            source,
            d.message
        ));
    }
    if let Some(warning) = &result.warning {
        lines.push(format!("Warning: {warning}"));
    }
    lines.join("\n")
}

pub fn format_describe(result: &DescribeResult) -> String {
    let mut lines = vec![
        format!("Daemon PID: {} (v{})", result.daemon_pid, result.version),
        String::new(),
        "Caches:".to_string(),
        format!(
            "  Symbol: {} / {} ({} entries)",
            format_size(result.symbol_cache.current_bytes),
            format_size(result.symbol_cache.max_bytes),
            result.symbol_cache.entries
        ),
        format!(
            "  Hover:  {} / {} ({} entries)",
            format_size(result.hover_cache.current_bytes),
            format_size(result.hover_cache.max_bytes),
            result.hover_cache.entries
        ),
    ];

    if result.workspaces.is_empty() {
        lines.push("\nNo active workspaces".to_string());
    } else {
        lines.push("\nActive workspaces:".to_string());
        let mut roots: Vec<&str> = result.workspaces.iter().map(|w| w.root.as_str()).collect();
        roots.sort();
        roots.dedup();
        for root in roots {
            lines.push(format!("\n  {root}"));
            for ws in result.workspaces.iter().filter(|w| w.root == root) {
                let pid = ws
                    .server_pid
                    .map(|p| format!(", PID {p}"))
                    .unwrap_or_default();
                lines.push(format!(
                    "    {} (running{pid}) [{} open files]",
                    ws.server,
                    ws.open_documents.len()
                ));
            }
        }
    }
    lines.join("\n")
}

/// `Error: <kind>: <detail>`, with the candidate list for ambiguity.
pub fn format_error(error: &RpcError) -> String {
    let mut out = format!("Error: {}: {}", error.kind, error.detail);
    for candidate in &error.candidates {
        if let Some(reference) = &candidate.reference {
            out.push_str(&format!("\n  {reference}"));
        }
        out.push_str(&format!("\n    {}", symbol_line(candidate)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use leta_proto::{ErrorKind, LocationHit, Severity, SymbolKind};

    fn hit(path: &str, line: u32, kind: SymbolKind, name: &str, container: Option<&str>) -> SymbolHit {
        SymbolHit {
            name: name.to_string(),
            kind,
            path: path.to_string(),
            line,
            column: 0,
            container: container.map(str::to_string),
            detail: None,
            docs: None,
            range_start_line: None,
            range_end_line: None,
            reference: None,
        }
    }

    #[test]
    fn grep_line_contract() {
        let result = GrepResult {
            symbols: vec![hit("api/handler.go", 14, SymbolKind::Struct, "AuthHandler", None)],
            truncated: false,
            warning: None,
        };
        assert_eq!(format_grep(&result, false), "api/handler.go:14 [Struct] AuthHandler");
    }

    #[test]
    fn grep_includes_container_and_docs() {
        let mut h = hit("a.py", 3, SymbolKind::Method, "save", Some("User"));
        h.docs = Some("Persist the user.\nSecond line.\nThird.\nFourth.".into());
        let result = GrepResult {
            symbols: vec![h],
            truncated: false,
            warning: None,
        };
        let text = format_grep(&result, true);
        assert!(text.starts_with("a.py:3 [Method] save in User"));
        assert!(text.contains("    Persist the user."));
        // Docs are capped at three lines.
        assert!(!text.contains("Fourth."));
    }

    #[test]
    fn show_header_contract() {
        let result = ShowResult {
            path: "main.py".into(),
            start_line: 10,
            end_line: 14,
            content: "def create_sample_user():\n    return User()".into(),
            symbol: Some("create_sample_user".into()),
            truncated: false,
            total_lines: None,
        };
        let text = format_show(&result);
        assert!(text.starts_with("main.py:10-14\n\ndef create_sample_user()"));
    }

    #[test]
    fn locations_with_context_blocks() {
        let result = LocationsResult {
            locations: vec![LocationHit {
                path: "src/a.rs".into(),
                line: 5,
                column: 2,
                name: None,
                kind: None,
                detail: None,
                context_start: Some(4),
                context_lines: Some(vec!["fn a() {".into(), "    b();".into()]),
            }],
            warning: None,
        };
        let text = format_locations(&result);
        assert_eq!(text, "src/a.rs:5\nfn a() {\n    b();");
    }

    #[test]
    fn calls_path_renders_indented_chain() {
        let node = |name: &str, path: &str, line: u32| CallNode {
            name: name.into(),
            kind: None,
            detail: None,
            path: path.into(),
            line,
            column: 0,
            children: None,
        };
        let result = CallsResult {
            root: None,
            path: Some(vec![node("main", "main.go", 5), node("helper", "util.go", 12)]),
            message: None,
        };
        assert_eq!(
            format_calls(&result),
            "Call path found:\nmain.go:5 main\n  util.go:12 helper"
        );
    }

    #[test]
    fn calls_tree_renders_connectors() {
        let result = CallsResult {
            root: Some(CallNode {
                name: "main".into(),
                kind: None,
                detail: None,
                path: "main.go".into(),
                line: 3,
                column: 0,
                children: Some(vec![
                    CallNode {
                        name: "setup".into(),
                        kind: None,
                        detail: None,
                        path: "setup.go".into(),
                        line: 8,
                        column: 0,
                        children: None,
                    },
                    CallNode {
                        name: "run".into(),
                        kind: None,
                        detail: None,
                        path: "run.go".into(),
                        line: 1,
                        column: 0,
                        children: None,
                    },
                ]),
            }),
            path: None,
            message: None,
        };
        let text = format_calls(&result);
        assert!(text.contains("main.go:3 main"));
        assert!(text.contains("├── setup.go:8 setup"));
        assert!(text.contains("└── run.go:1 run"));
    }

    #[test]
    fn files_tree_nests_directories() {
        let mut files = BTreeMap::new();
        files.insert(
            "src/lib.rs".to_string(),
            FileInfo {
                path: "src/lib.rs".into(),
                lines: 10,
                bytes: 120,
                symbols: BTreeMap::from([("function".to_string(), 2u32)]),
            },
        );
        files.insert(
            "main.rs".to_string(),
            FileInfo {
                path: "main.rs".into(),
                lines: 5,
                bytes: 64,
                symbols: BTreeMap::new(),
            },
        );
        let result = FilesResult {
            files,
            total_files: 2,
            total_bytes: 184,
            total_lines: 15,
        };
        let text = format_files(&result);
        assert!(text.contains("main.rs (64B, 5 lines)"));
        assert!(text.contains("src"));
        assert!(text.contains("lib.rs (120B, 10 lines, 2 function)"));
        assert!(text.ends_with("2 files, 184B, 15 lines"));
    }

    #[test]
    fn diagnostics_line_shape() {
        let result = DiagnosticsResult {
            diagnostics: vec![leta_proto::DiagnosticInfo {
                path: "errors.py".into(),
                line: 7,
                column: 4,
                severity: Severity::Error,
                source: Some("pyright".into()),
                message: "name is not defined".into(),
            }],
            warning: None,
        };
        assert_eq!(
            format_diagnostics(&result),
            "errors.py:7:4 error [pyright]: name is not defined"
        );
    }

    #[test]
    fn error_rendering_includes_ambiguity_candidates() {
        let mut candidate = hit("models.ts", 12, SymbolKind::Method, "save", Some("Class1"));
        candidate.reference = Some("Class1.save".into());
        let error = RpcError::ambiguous("Symbol 'save' is ambiguous (3 matches)", vec![candidate]);
        let text = format_error(&error);
        assert!(text.starts_with("Error: Ambiguous: Symbol 'save' is ambiguous"));
        assert!(text.contains("\n  Class1.save"));
        assert!(text.contains("models.ts:12 [Method] save in Class1"));
    }

    #[test]
    fn plain_error_rendering() {
        let error = RpcError::new(ErrorKind::PathNotFound, "no call path from 'main' to 'ValidateEmail' within depth 3");
        assert_eq!(
            format_error(&error),
            "Error: PathNotFound: no call path from 'main' to 'ValidateEmail' within depth 3"
        );
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0MB");
    }
}
