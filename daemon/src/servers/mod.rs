// SPDX-License-Identifier: MIT
//! Registry of the language servers the daemon knows how to launch.
//!
//! One table, built once: each entry names the languages it serves, the
//! launch command, the files that mark a project root, and the behavioral
//! quirks the session layer works around. Lookup is by language-id
//! membership; when several entries serve a language, their order in the
//! table is the preference order, and the `[servers.<lang>]` config section
//! can promote a specific entry. Languages no entry serves are skipped
//! silently.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::config::Config;
use crate::text::language_id;

/// Behavioral quirks a server is known for; consulted by the session and
/// rename handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerQuirks {
    /// Only indexes files that have been opened at least once; the session
    /// pre-opens source files after startup (clangd).
    pub lazy_indexing: bool,
    /// Processes notifications on an internal queue; a documentSymbol
    /// round-trip after didOpen acts as a barrier (ruby-lsp).
    pub needs_open_barrier: bool,
    /// Index does not pick up renames reliably; restart after a rename
    /// forces a reindex (ruby-lsp).
    pub restart_after_rename: bool,
}

/// One launchable language server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// Executable name, as shown in logs and error messages.
    pub name: &'static str,
    /// Full launch command, executable first.
    pub command: &'static [&'static str],
    /// Language ids this server handles.
    pub languages: &'static [&'static str],
    /// Files or directories that delimit a project root.
    pub root_markers: &'static [&'static str],
    /// How to get the server when it is missing.
    pub install_hint: Option<&'static str>,
    pub quirks: ServerQuirks,
}

impl ServerSpec {
    pub fn handles(&self, language_id: &str) -> bool {
        self.languages.contains(&language_id)
    }

    fn executable(&self) -> &'static str {
        self.command.first().copied().unwrap_or_default()
    }

    /// Whether the executable resolves anywhere on the daemon's search path.
    fn is_installed(&self) -> bool {
        let exe = self.executable();
        search_path()
            .split(':')
            .any(|dir| Path::new(dir).join(exe).is_file())
    }

    /// Server-specific initialization options.
    pub fn init_options(&self) -> Option<Value> {
        match self.name {
            // Hover links bloat extracted docs and carry no signal for a CLI.
            "gopls" => Some(json!({"linksInHover": false})),
            _ => None,
        }
    }
}

/// Returns the servers letad supports out of the box. Entries earlier in
/// the list win when more than one serves the same language.
fn builtin_servers() -> Vec<ServerSpec> {
    vec![
        ServerSpec {
            name: "rust-analyzer",
            command: &["rust-analyzer"],
            languages: &["rust"],
            root_markers: &["Cargo.toml"],
            install_hint: Some("rustup component add rust-analyzer"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "gopls",
            command: &["gopls"],
            languages: &["go"],
            root_markers: &["go.mod"],
            install_hint: Some("go install golang.org/x/tools/gopls@latest"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "typescript-language-server",
            command: &["typescript-language-server", "--stdio"],
            languages: &["typescript", "typescriptreact", "javascript", "javascriptreact"],
            root_markers: &["tsconfig.json", "jsconfig.json", "package.json"],
            install_hint: Some("npm install -g typescript-language-server typescript"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "basedpyright",
            command: &["basedpyright-langserver", "--stdio"],
            languages: &["python"],
            root_markers: &["pyproject.toml", "setup.py", "requirements.txt"],
            install_hint: Some("npm install -g basedpyright"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "pylsp",
            command: &["pylsp"],
            languages: &["python"],
            root_markers: &["pyproject.toml", "setup.py"],
            install_hint: Some("pip install python-lsp-server"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "clangd",
            command: &["clangd"],
            languages: &["c", "cpp"],
            root_markers: &["compile_commands.json", "CMakeLists.txt"],
            install_hint: Some("apt install clangd, or brew install llvm"),
            quirks: ServerQuirks {
                lazy_indexing: true,
                ..ServerQuirks::default()
            },
        },
        ServerSpec {
            name: "jdtls",
            command: &["jdtls"],
            languages: &["java"],
            root_markers: &["pom.xml", "build.gradle"],
            install_hint: None,
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "ruby-lsp",
            command: &["ruby-lsp"],
            languages: &["ruby"],
            root_markers: &["Gemfile", "Rakefile"],
            install_hint: Some("gem install ruby-lsp"),
            quirks: ServerQuirks {
                needs_open_barrier: true,
                restart_after_rename: true,
                ..ServerQuirks::default()
            },
        },
        ServerSpec {
            name: "intelephense",
            command: &["intelephense", "--stdio"],
            languages: &["php"],
            root_markers: &["composer.json"],
            install_hint: Some("npm install -g intelephense"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "lua-language-server",
            command: &["lua-language-server"],
            languages: &["lua"],
            root_markers: &[".luarc.json"],
            install_hint: Some("brew install lua-language-server"),
            quirks: ServerQuirks::default(),
        },
        ServerSpec {
            name: "zls",
            command: &["zls"],
            languages: &["zig"],
            root_markers: &["build.zig"],
            install_hint: Some("brew install zls"),
            quirks: ServerQuirks::default(),
        },
    ]
}

static REGISTRY: Lazy<Vec<ServerSpec>> = Lazy::new(builtin_servers);

/// The PATH the daemon searches and hands to spawned servers: the inherited
/// PATH, then the usual per-toolchain bin directories, so servers installed
/// by rustup, go, gem, or npm resolve even under a minimal environment.
fn search_path() -> String {
    let mut dirs: Vec<String> = std::env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();
    if let Ok(home) = std::env::var("HOME") {
        for sub in [".cargo/bin", "go/bin", ".gem/bin", ".local/bin"] {
            dirs.push(format!("{home}/{sub}"));
        }
    }
    for fixed in ["/usr/local/bin", "/opt/homebrew/bin"] {
        if !dirs.iter().any(|d| d == fixed) {
            dirs.push(fixed.to_string());
        }
    }
    dirs.join(":")
}

/// Environment for spawned servers: the parent environment with PATH
/// widened to the search path.
pub fn server_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("PATH".to_string(), search_path());
    env
}

/// Resolve the server for a language id: the configured preference when it
/// is installed, otherwise the first installed entry, otherwise the first
/// entry (its spawn failure carries the install hint).
pub fn server_for_language(
    language_id: &str,
    config: Option<&Config>,
) -> Option<&'static ServerSpec> {
    let candidates: Vec<&'static ServerSpec> =
        REGISTRY.iter().filter(|s| s.handles(language_id)).collect();
    let first = *candidates.first()?;

    let preferred = config
        .and_then(|c| c.servers.get(language_id))
        .and_then(|p| p.preferred.as_deref());
    if let Some(name) = preferred {
        if let Some(found) = candidates
            .iter()
            .copied()
            .find(|s| s.name == name && s.is_installed())
        {
            return Some(found);
        }
    }

    candidates
        .into_iter()
        .find(|s| s.is_installed())
        .or(Some(first))
}

pub fn server_for_file(path: &Path, config: Option<&Config>) -> Option<&'static ServerSpec> {
    server_for_language(language_id(path), config)
}

/// Whether any registered server handles this language.
pub fn language_supported(language_id: &str) -> bool {
    REGISTRY.iter().any(|s| s.handles(language_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typescript_variants_share_one_server() {
        for lang in ["typescript", "typescriptreact", "javascript", "javascriptreact"] {
            let spec = server_for_language(lang, None).unwrap();
            assert_eq!(spec.name, "typescript-language-server");
        }
    }

    #[test]
    fn unknown_language_is_skipped_silently() {
        assert!(server_for_language("cobol", None).is_none());
        assert!(server_for_language("plaintext", None).is_none());
        assert!(!language_supported("fortran"));
    }

    #[test]
    fn file_routing_follows_extension() {
        assert_eq!(server_for_file(Path::new("main.go"), None).unwrap().name, "gopls");
        assert_eq!(
            server_for_file(Path::new("lib.rs"), None).unwrap().name,
            "rust-analyzer"
        );
        assert!(server_for_file(Path::new("README.md"), None).is_none());
    }

    #[test]
    fn c_and_cpp_share_clangd() {
        let c = server_for_language("c", None).unwrap();
        let cpp = server_for_language("cpp", None).unwrap();
        assert_eq!(c.name, "clangd");
        assert_eq!(cpp.name, "clangd");
        assert!(c.quirks.lazy_indexing);
    }

    #[test]
    fn python_has_a_fallback_server() {
        let names: Vec<&str> = builtin_servers()
            .iter()
            .filter(|s| s.handles("python"))
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["basedpyright", "pylsp"]);
    }

    #[test]
    fn ruby_quirks_are_recorded() {
        let spec = server_for_language("ruby", None).unwrap();
        assert!(spec.quirks.needs_open_barrier);
        assert!(spec.quirks.restart_after_rename);
    }

    #[test]
    fn preferred_server_must_be_installed_to_win() {
        // pylsp is almost certainly not installed in the test environment,
        // so the preference falls through to the default ordering.
        let mut config = Config::default();
        config.servers.insert(
            "python".into(),
            crate::config::ServerPreference {
                preferred: Some("pylsp".into()),
            },
        );
        let spec = server_for_language("python", Some(&config)).unwrap();
        assert!(spec.handles("python"));
    }

    #[test]
    fn search_path_reaches_toolchain_bins() {
        let path = search_path();
        assert!(path.contains("/.cargo/bin"));
        assert!(path.contains("/usr/local/bin"));
    }

    #[test]
    fn gopls_disables_hover_links() {
        let gopls = builtin_servers()
            .into_iter()
            .find(|s| s.name == "gopls")
            .unwrap();
        assert_eq!(gopls.init_options().unwrap()["linksInHover"], json!(false));
    }
}
