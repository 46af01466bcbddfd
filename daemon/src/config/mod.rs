// SPDX-License-Identifier: MIT
//! On-disk configuration for the daemon and CLI.
//!
//! A single TOML file under the user config directory with sections for the
//! daemon (log level, timeout, cache budgets), registered workspace roots,
//! formatting options, and per-language server preferences. Load/save is
//! guarded by an exclusive flock so concurrent CLI invocations cannot tear
//! the file.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

struct ConfigLock {
    _file: File,
}

impl ConfigLock {
    fn acquire() -> Result<Self, std::io::Error> {
        let lock_path = config_path().with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(ConfigLock { _file: file })
    }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leta")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leta")
}

pub fn log_dir() -> PathBuf {
    cache_dir().join("log")
}

pub fn socket_path() -> PathBuf {
    cache_dir().join("daemon.sock")
}

pub fn pid_path() -> PathBuf {
    cache_dir().join("daemon.pid")
}

pub fn hover_cache_path() -> PathBuf {
    cache_dir().join("hover_cache.json")
}

// ─── Sections ────────────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cache_bytes() -> u64 {
    64 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-LSP-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_cache_bytes")]
    pub symbol_cache_bytes: u64,
    #[serde(default = "default_cache_bytes")]
    pub hover_cache_bytes: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            request_timeout: default_request_timeout(),
            symbol_cache_bytes: default_cache_bytes(),
            hover_cache_bytes: default_cache_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspacesSection {
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default)]
    pub excluded_languages: Vec<String>,
}

fn default_tab_size() -> u32 {
    4
}

fn default_insert_spaces() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattingSection {
    #[serde(default = "default_tab_size")]
    pub tab_size: u32,
    #[serde(default = "default_insert_spaces")]
    pub insert_spaces: bool,
}

impl Default for FormattingSection {
    fn default() -> Self {
        Self {
            tab_size: default_tab_size(),
            insert_spaces: default_insert_spaces(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerPreference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub workspaces: WorkspacesSection,
    #[serde(default)]
    pub formatting: FormattingSection,
    #[serde(default)]
    pub servers: HashMap<String, ServerPreference>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let _lock = ConfigLock::acquire()?;
        Self::load_unlocked()
    }

    fn load_unlocked() -> Result<Self, ConfigError> {
        let path = config_path();
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let _lock = ConfigLock::acquire()?;
        self.save_unlocked()
    }

    fn save_unlocked(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir())?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path(), content)?;
        Ok(())
    }

    /// Register a workspace root. Returns false if it was already present.
    pub fn add_workspace_root(root: &Path) -> Result<bool, ConfigError> {
        let _lock = ConfigLock::acquire()?;
        let mut config = Self::load_unlocked()?;
        let root_str = root.to_string_lossy().to_string();
        if config.workspaces.roots.contains(&root_str) {
            return Ok(false);
        }
        config.workspaces.roots.push(root_str);
        config.save_unlocked()?;
        Ok(true)
    }

    pub fn remove_workspace_root(root: &Path) -> Result<bool, ConfigError> {
        let _lock = ConfigLock::acquire()?;
        let mut config = Self::load_unlocked()?;
        let root_str = root.to_string_lossy().to_string();
        let before = config.workspaces.roots.len();
        config.workspaces.roots.retain(|r| r != &root_str);
        if config.workspaces.roots.len() < before {
            config.save_unlocked()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Pick the workspace root that encloses `path`. Roots are checked in
    /// registration order and the first match wins; when `path` is outside
    /// every root, fall back to the root enclosing `cwd`.
    pub fn enclosing_workspace_root(&self, path: &Path, cwd: Option<&Path>) -> Option<PathBuf> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for root_str in &self.workspaces.roots {
            let root = PathBuf::from(root_str);
            let root = root.canonicalize().unwrap_or(root);
            if path.starts_with(&root) {
                return Some(root);
            }
        }
        if let Some(cwd) = cwd {
            let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
            for root_str in &self.workspaces.roots {
                let root = PathBuf::from(root_str);
                let root = root.canonicalize().unwrap_or(root);
                if cwd.starts_with(&root) {
                    return Some(root);
                }
            }
        }
        None
    }

    /// Drop registered roots whose directories no longer exist.
    pub fn cleanup_stale_workspace_roots(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        self.workspaces.roots.retain(|root| {
            if Path::new(root).exists() {
                true
            } else {
                removed.push(root.clone());
                false
            }
        });
        if !removed.is_empty() {
            let _ = self.save();
        }
        removed
    }
}

/// Walk up from `path` looking for a project-root marker.
pub fn detect_workspace_root(path: &Path) -> Option<PathBuf> {
    const MARKERS: &[&str] = &[
        ".git",
        "Cargo.toml",
        "go.mod",
        "package.json",
        "pyproject.toml",
        "setup.py",
        "pom.xml",
        "build.gradle",
        "Gemfile",
        "composer.json",
        "build.zig",
    ];

    let mut current = path.to_path_buf();
    loop {
        for marker in MARKERS {
            if current.join(marker).exists() {
                return Some(current);
            }
        }
        if !current.pop() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.request_timeout, 30);
        assert_eq!(config.formatting.tab_size, 4);
        assert!(config.formatting.insert_spaces);
        assert!(config.workspaces.roots.is_empty());
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let mut config = Config::default();
        config.workspaces.roots.push("/home/dev/proj".into());
        config.workspaces.excluded_languages.push("lua".into());
        config.servers.insert(
            "python".into(),
            ServerPreference {
                preferred: Some("pylsp".into()),
            },
        );
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.workspaces.roots, vec!["/home/dev/proj"]);
        assert_eq!(back.workspaces.excluded_languages, vec!["lua"]);
        assert_eq!(
            back.servers.get("python").unwrap().preferred.as_deref(),
            Some("pylsp")
        );
    }

    #[test]
    fn enclosing_root_prefers_first_registered() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("nested");
        std::fs::create_dir_all(&inner).unwrap();

        let mut config = Config::default();
        config
            .workspaces
            .roots
            .push(outer.path().to_string_lossy().to_string());
        config
            .workspaces
            .roots
            .push(inner.to_string_lossy().to_string());

        // First registered root that encloses the file wins.
        let file = inner.join("mod.rs");
        let chosen = config.enclosing_workspace_root(&file, None).unwrap();
        assert_eq!(chosen, outer.path().canonicalize().unwrap());
    }

    #[test]
    fn enclosing_root_falls_back_to_cwd() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config
            .workspaces
            .roots
            .push(root.path().to_string_lossy().to_string());

        let outside = Path::new("/somewhere/else.rs");
        let chosen = config.enclosing_workspace_root(outside, Some(root.path()));
        assert_eq!(chosen.unwrap(), root.path().canonicalize().unwrap());
        assert!(config.enclosing_workspace_root(outside, None).is_none());
    }

    #[test]
    fn detect_root_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("proj");
        let nested = project.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(project.join("Cargo.toml"), "[package]").unwrap();

        assert_eq!(detect_workspace_root(&nested).unwrap(), project);
    }
}
