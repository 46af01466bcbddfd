// SPDX-License-Identifier: MIT
//! Text and path utilities shared across the daemon: language detection,
//! content hashing, UTF-16 column conversion, and path↔URI mapping.
//!
//! LSP positions on the wire are 0-based (line, UTF-16 code unit); locally
//! we work with 1-based lines and byte columns. The conversion helpers here
//! are the single place where that translation happens.

use std::path::{Path, PathBuf};

use lsp_types::Uri;
use sha2::{Digest, Sha256};

/// Detect the LSP language id for a file. Extension first, then well-known
/// filenames, then a shebang sniff for extensionless scripts.
pub fn language_id(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or("");

    match ext {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" | "hxx" => "cpp",
        "java" => "java",
        "rb" | "rake" => "ruby",
        "php" | "phtml" => "php",
        "lua" => "lua",
        "zig" => "zig",
        "sh" | "bash" => "shellscript",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "" => match filename {
            "Gemfile" | "Rakefile" => "ruby",
            "Makefile" | "makefile" | "GNUmakefile" => "makefile",
            "Dockerfile" => "dockerfile",
            _ => sniff_shebang(path),
        },
        _ => match filename {
            "Gemfile" | "Rakefile" => "ruby",
            _ => "plaintext",
        },
    }
}

/// Read the first line of an extensionless file and map a `#!` interpreter
/// to a language id. Anything unrecognized stays plaintext.
fn sniff_shebang(path: &Path) -> &'static str {
    let Ok(content) = std::fs::read(path) else {
        return "plaintext";
    };
    let first = content.split(|&b| b == b'\n').next().unwrap_or(&[]);
    let Ok(line) = std::str::from_utf8(first) else {
        return "plaintext";
    };
    if !line.starts_with("#!") {
        return "plaintext";
    }
    if line.contains("python") {
        "python"
    } else if line.contains("ruby") {
        "ruby"
    } else if line.contains("node") {
        "javascript"
    } else if line.contains("bash") || line.contains("/sh") {
        "shellscript"
    } else {
        "plaintext"
    }
}

pub fn read_file_content(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// sha256 of the file's bytes, hex-encoded. Empty string if unreadable,
/// which deliberately never matches a real hash.
pub fn content_hash(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
        Err(_) => String::new(),
    }
}

pub fn hash_str(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Convert a UTF-16 code-unit column (LSP wire format) into a byte offset
/// within `line`. Columns past the end clamp to the line length.
pub fn utf16_col_to_byte(line: &str, col: u32) -> usize {
    let mut units = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if units >= col {
            return byte_idx;
        }
        units += ch.len_utf16() as u32;
    }
    line.len()
}

/// Convert a byte offset within `line` back into a UTF-16 code-unit column.
pub fn byte_to_utf16_col(line: &str, byte: usize) -> u32 {
    let mut units = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if byte_idx >= byte {
            return units;
        }
        units += ch.len_utf16() as u32;
    }
    units
}

/// Extract `context` lines around `center_line` (0-based). Returns the
/// lines, and the 0-based start and end of the extracted window.
pub fn lines_around(content: &str, center_line: usize, context: usize) -> (Vec<String>, usize, usize) {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return (Vec::new(), 0, 0);
    }
    let center = center_line.min(lines.len() - 1);
    let start = center.saturating_sub(context);
    let end = (center + context).min(lines.len() - 1);
    let extracted = lines[start..=end].iter().map(|s| s.to_string()).collect();
    (extracted, start, end)
}

pub fn count_lines(content: &str) -> u32 {
    content.lines().count() as u32
}

pub fn path_to_uri(path: &Path) -> Uri {
    if let Ok(url) = url::Url::from_file_path(path) {
        if let Ok(uri) = url.as_str().parse() {
            return uri;
        }
    }
    // Relative paths: anchor at the current directory before converting.
    let anchored = std::env::current_dir().unwrap_or_default().join(path);
    url::Url::from_file_path(&anchored)
        .ok()
        .and_then(|u| u.as_str().parse().ok())
        .unwrap_or_else(|| "file:///".parse().expect("static file uri"))
}

pub fn uri_to_path(uri: &Uri) -> PathBuf {
    if let Ok(url) = url::Url::parse(uri.as_str()) {
        if let Ok(path) = url.to_file_path() {
            return path;
        }
    }
    PathBuf::from(uri.as_str().trim_start_matches("file://"))
}

pub fn relative_path(path: &Path, workspace_root: &Path) -> String {
    path.strip_prefix(workspace_root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn language_detection_by_extension() {
        assert_eq!(language_id(Path::new("main.py")), "python");
        assert_eq!(language_id(Path::new("lib.rs")), "rust");
        assert_eq!(language_id(Path::new("app.tsx")), "typescriptreact");
        assert_eq!(language_id(Path::new("main.go")), "go");
        assert_eq!(language_id(Path::new("notes.txt")), "plaintext");
    }

    #[test]
    fn language_detection_by_filename() {
        assert_eq!(language_id(Path::new("Gemfile")), "ruby");
        assert_eq!(language_id(Path::new("Dockerfile")), "dockerfile");
    }

    #[test]
    fn shebang_sniff_for_extensionless_scripts() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "#!/usr/bin/env python3").unwrap();
        writeln!(f, "print('hi')").unwrap();
        // NamedTempFile names carry a random suffix with no dot, so the
        // extension is empty and the sniff path is exercised.
        assert_eq!(language_id(f.path()), "python");
    }

    #[test]
    fn utf16_columns_roundtrip_ascii() {
        let line = "fn main() {}";
        assert_eq!(utf16_col_to_byte(line, 3), 3);
        assert_eq!(byte_to_utf16_col(line, 3), 3);
    }

    #[test]
    fn utf16_columns_handle_multibyte() {
        // 'é' is 2 bytes in UTF-8, 1 code unit in UTF-16.
        let line = "é = 1";
        assert_eq!(utf16_col_to_byte(line, 1), 2);
        assert_eq!(byte_to_utf16_col(line, 2), 1);
    }

    #[test]
    fn utf16_columns_handle_surrogate_pairs() {
        // '𝕏' is outside the BMP: 4 bytes in UTF-8, 2 UTF-16 code units.
        let line = "𝕏y";
        assert_eq!(utf16_col_to_byte(line, 2), 4);
        assert_eq!(utf16_col_to_byte(line, 3), 5);
        assert_eq!(byte_to_utf16_col(line, 4), 2);
    }

    #[test]
    fn utf16_column_clamps_past_end() {
        assert_eq!(utf16_col_to_byte("ab", 10), 2);
    }

    #[test]
    fn lines_around_window() {
        let content = "l0\nl1\nl2\nl3\nl4";
        let (lines, start, end) = lines_around(content, 2, 1);
        assert_eq!(lines, vec!["l1", "l2", "l3"]);
        assert_eq!((start, end), (1, 3));
    }

    #[test]
    fn lines_around_empty_content() {
        let (lines, start, end) = lines_around("", 5, 2);
        assert!(lines.is_empty());
        assert_eq!((start, end), (0, 0));
    }

    #[test]
    fn content_hash_changes_with_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "one").unwrap();
        f.flush().unwrap();
        let h1 = content_hash(f.path());
        write!(f, "two").unwrap();
        f.flush().unwrap();
        let h2 = content_hash(f.path());
        assert_ne!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn missing_file_hashes_to_empty() {
        assert_eq!(content_hash(Path::new("/nonexistent/leta/file.rs")), "");
    }

    #[test]
    fn path_uri_roundtrip() {
        let path = Path::new("/tmp/project/src/main.rs");
        let uri = path_to_uri(path);
        assert!(uri.as_str().starts_with("file://"));
        assert_eq!(uri_to_path(&uri), path);
    }

    #[test]
    fn uri_with_spaces_roundtrips() {
        let path = Path::new("/tmp/my project/file.rs");
        assert_eq!(uri_to_path(&path_to_uri(path)), path);
    }
}
