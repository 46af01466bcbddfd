// SPDX-License-Identifier: MIT
//! Workspace and language-server lifecycle, plus the document-sync state
//! the whole daemon hangs off.
//!
//! A `Session` maps workspace root → server name → `Workspace`; each
//! workspace owns at most one live client per server. Servers are spawned
//! lazily on first use and torn down on remove/shutdown.
//!
//! Document sync follows open-for-operation semantics: before a
//! file-targeted request the on-disk content hash is compared with the
//! hash the server last saw; on drift the document is reopened with the
//! current text and a bumped version. Versions increase monotonically per
//! URI per server, across closes. A per-URI lease serializes open/close
//! pairs so concurrent handlers cannot interleave them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{log_dir, Config};
use crate::lsp::{LspClient, LspError};
use crate::servers::{server_env, server_for_file, server_for_language, ServerSpec};
use crate::text::{hash_str, language_id, path_to_uri, read_file_content};

const STARTUP_READY_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct OpenDocument {
    version: i32,
    content_hash: String,
}

/// Per-workspace document state, shared out of the workspace map so sync
/// operations never hold the session-wide lock across an LSP call.
#[derive(Default)]
pub struct DocumentTracker {
    state: Mutex<DocState>,
    leases: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Default)]
struct DocState {
    open: HashMap<String, OpenDocument>,
    /// Last version issued per URI; survives didClose so versions stay
    /// monotonic for the server's whole lifetime.
    versions: HashMap<String, i32>,
}

impl DocumentTracker {
    async fn lease(&self, uri: &str) -> Arc<Mutex<()>> {
        let mut leases = self.leases.lock().await;
        leases
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn open_uris(&self) -> Vec<String> {
        self.state.lock().await.open.keys().cloned().collect()
    }

    pub async fn is_open(&self, uri: &str) -> bool {
        self.state.lock().await.open.contains_key(uri)
    }
}

pub struct Workspace {
    root: PathBuf,
    spec: &'static ServerSpec,
    client: Option<Arc<LspClient>>,
    docs: Arc<DocumentTracker>,
}

impl Workspace {
    fn new(root: PathBuf, spec: &'static ServerSpec) -> Self {
        Self {
            root,
            spec,
            client: None,
            docs: Arc::new(DocumentTracker::default()),
        }
    }

    async fn start(&mut self, request_timeout: Duration) -> Result<(), LspError> {
        if self.client.as_ref().is_some_and(|c| c.is_alive()) {
            return Ok(());
        }

        info!(server = self.spec.name, root = %self.root.display(), "starting language server");
        let command: Vec<String> = self.spec.command.iter().map(|s| s.to_string()).collect();
        let client = LspClient::spawn(
            &command,
            &self.root,
            self.spec.name,
            self.spec.init_options(),
            request_timeout,
            &log_dir(),
            &server_env(),
        )
        .await
        .map_err(|e| match (e, self.spec.install_hint) {
            (LspError::Spawn { server, message }, Some(hint)) => LspError::Spawn {
                server,
                message: format!("{message} (install with: {hint})"),
            },
            (other, _) => other,
        })?;

        client.wait_for_ready(STARTUP_READY_TIMEOUT_SECS).await;
        self.client = Some(client);

        if self.spec.quirks.lazy_indexing {
            self.preopen_sources().await;
        }
        Ok(())
    }

    /// clangd only indexes files it has seen; open and close every matching
    /// source file once so documentSymbol works across the workspace.
    async fn preopen_sources(&self) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let mut files = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root).build().flatten() {
            let path = entry.path();
            if path.is_file() && self.spec.languages.contains(&language_id(path)) {
                files.push(path.to_path_buf());
            }
        }
        if files.is_empty() {
            return;
        }
        info!(server = self.spec.name, count = files.len(), "pre-indexing source files");
        for path in &files {
            let _ = open_document(&client, &self.docs, self.spec, path).await;
        }
        client.wait_for_ready(30).await;
        for path in &files {
            close_document(&client, &self.docs, path).await;
        }
    }

    async fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            info!(server = self.spec.name, "stopping language server");
            client.stop().await;
        }
        self.docs.state.lock().await.open.clear();
    }

    pub fn server_name(&self) -> &str {
        self.spec.name
    }
}

// ─── Document sync primitives ────────────────────────────────────────────────

/// Open (or re-open on drift) `path` on `client`. Returns the content hash
/// the server now has. This is the document-sync invariant in one place:
/// after this returns Ok, the server's view of the file equals the hash in
/// the tracker.
async fn open_document(
    client: &Arc<LspClient>,
    docs: &Arc<DocumentTracker>,
    spec: &ServerSpec,
    path: &Path,
) -> Result<String, LspError> {
    let uri = path_to_uri(path);
    let uri_s = uri.to_string();

    let lease = docs.lease(&uri_s).await;
    let _guard = lease.lock().await;

    let content = read_file_content(path)?;
    let disk_hash = hash_str(&content);

    let (needs_close, version) = {
        let state = docs.state.lock().await;
        match state.open.get(&uri_s) {
            Some(doc) if doc.content_hash == disk_hash => return Ok(disk_hash),
            Some(doc) => (true, doc.version + 1),
            None => (false, state.versions.get(&uri_s).copied().unwrap_or(0) + 1),
        }
    };

    if needs_close {
        debug!(uri = %uri_s, "document drifted on disk, reopening");
        client
            .notify("textDocument/didClose", json!({"textDocument": {"uri": uri_s}}))
            .await?;
    }

    client
        .notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri_s,
                    "languageId": language_id(path),
                    "version": version,
                    "text": content,
                }
            }),
        )
        .await?;

    {
        let mut state = docs.state.lock().await;
        state.versions.insert(uri_s.clone(), version);
        state.open.insert(
            uri_s.clone(),
            OpenDocument {
                version,
                content_hash: disk_hash.clone(),
            },
        );
    }

    // ruby-lsp queues notifications; a request round-trip guarantees the
    // didOpen has been consumed before the caller's next request.
    if spec.quirks.needs_open_barrier {
        let _ = client
            .request_value(
                "textDocument/documentSymbol",
                json!({"textDocument": {"uri": uri_s}}),
            )
            .await;
    }

    Ok(disk_hash)
}

async fn close_document(client: &Arc<LspClient>, docs: &Arc<DocumentTracker>, path: &Path) {
    let uri_s = path_to_uri(path).to_string();
    let lease = docs.lease(&uri_s).await;
    let _guard = lease.lock().await;

    let was_open = docs.state.lock().await.open.remove(&uri_s).is_some();
    if was_open {
        let _ = client
            .notify("textDocument/didClose", json!({"textDocument": {"uri": uri_s}}))
            .await;
    }
}

/// Push new content for an already-open document (didChange, full text).
async fn change_document(
    client: &Arc<LspClient>,
    docs: &Arc<DocumentTracker>,
    path: &Path,
    new_content: &str,
) -> Result<(), LspError> {
    let uri_s = path_to_uri(path).to_string();
    let lease = docs.lease(&uri_s).await;
    let _guard = lease.lock().await;

    let version = {
        let mut state = docs.state.lock().await;
        let v = state.versions.get(&uri_s).copied().unwrap_or(0) + 1;
        state.versions.insert(uri_s.clone(), v);
        state.open.insert(
            uri_s.clone(),
            OpenDocument {
                version: v,
                content_hash: hash_str(new_content),
            },
        );
        v
    };

    client
        .notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri_s, "version": version},
                "contentChanges": [{"text": new_content}],
            }),
        )
        .await
}

// ─── Session ─────────────────────────────────────────────────────────────────

pub struct Session {
    workspaces: RwLock<HashMap<PathBuf, HashMap<String, Workspace>>>,
    config: RwLock<Config>,
    request_timeout: Duration,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let request_timeout = Duration::from_secs(config.daemon.request_timeout.max(1));
        Self {
            workspaces: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            request_timeout,
        }
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn reload_config(&self, config: Config) {
        *self.config.write().await = config;
    }

    /// Idempotently get (spawning if needed) the workspace serving `file_path`.
    pub async fn workspace_for_file(
        &self,
        file_path: &Path,
        workspace_root: &Path,
    ) -> Result<WorkspaceHandle<'_>, LspError> {
        let spec = {
            let config = self.config.read().await;
            server_for_file(file_path, Some(&config)).ok_or_else(|| LspError::NotSupported {
                capability: format!("language for {}", file_path.display()),
                server: "any registered server".to_string(),
            })?
        };
        self.workspace_for_spec(workspace_root, spec).await
    }

    pub async fn workspace_for_language(
        &self,
        language_id: &str,
        workspace_root: &Path,
    ) -> Result<WorkspaceHandle<'_>, LspError> {
        let spec = {
            let config = self.config.read().await;
            server_for_language(language_id, Some(&config)).ok_or_else(|| {
                LspError::NotSupported {
                    capability: format!("language '{language_id}'"),
                    server: "any registered server".to_string(),
                }
            })?
        };
        self.workspace_for_spec(workspace_root, spec).await
    }

    async fn workspace_for_spec(
        &self,
        workspace_root: &Path,
        spec: &'static ServerSpec,
    ) -> Result<WorkspaceHandle<'_>, LspError> {
        let root = workspace_root
            .canonicalize()
            .unwrap_or_else(|_| workspace_root.to_path_buf());

        let needs_start = {
            let workspaces = self.workspaces.read().await;
            workspaces
                .get(&root)
                .and_then(|servers| servers.get(spec.name))
                .map(|ws| !ws.client.as_ref().is_some_and(|c| c.is_alive()))
                .unwrap_or(true)
        };

        if needs_start {
            // Spawn outside the map lock; server startup can take seconds.
            let mut fresh = Workspace::new(root.clone(), spec);
            fresh.start(self.request_timeout).await?;

            let mut workspaces = self.workspaces.write().await;
            let servers = workspaces.entry(root.clone()).or_default();
            let replace = servers
                .get(spec.name)
                .map(|ws| !ws.client.as_ref().is_some_and(|c| c.is_alive()))
                .unwrap_or(true);
            if replace {
                servers.insert(spec.name.to_string(), fresh);
            } else {
                // Another task won the race; throw ours away.
                fresh.stop().await;
            }
        }

        Ok(WorkspaceHandle {
            session: self,
            root,
            server_name: spec.name.to_string(),
            spec,
        })
    }

    /// Ready→Restarting→Ready for every server under `root`. In-flight
    /// requests observe `Restarted`.
    pub async fn restart_workspace(&self, root: &Path) -> Result<Vec<String>, LspError> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let mut workspaces = self.workspaces.write().await;

        let mut restarted = Vec::new();
        if let Some(servers) = workspaces.get_mut(&root) {
            for (name, workspace) in servers.iter_mut() {
                if let Some(client) = &workspace.client {
                    client.fail_pending_restarted().await;
                }
                workspace.stop().await;
                workspace.start(self.request_timeout).await?;
                restarted.push(name.clone());
            }
        }
        Ok(restarted)
    }

    pub async fn remove_workspace(&self, root: &Path) -> Vec<String> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let mut workspaces = self.workspaces.write().await;

        let mut stopped = Vec::new();
        if let Some(mut servers) = workspaces.remove(&root) {
            for (name, mut workspace) in servers.drain() {
                workspace.stop().await;
                stopped.push(name);
            }
        }
        stopped
    }

    pub async fn close_all(&self) {
        let mut workspaces = self.workspaces.write().await;
        for (_, mut servers) in workspaces.drain() {
            for (_, mut workspace) in servers.drain() {
                workspace.stop().await;
            }
        }
    }

    /// (root, server name, pid, open document URIs) for every workspace.
    pub async fn list_workspaces(&self) -> Vec<(String, String, Option<u32>, Vec<String>)> {
        let workspaces = self.workspaces.read().await;
        let mut out = Vec::new();
        for (root, servers) in workspaces.iter() {
            for workspace in servers.values() {
                let pid = workspace.client.as_ref().and_then(|c| c.pid());
                out.push((
                    root.to_string_lossy().to_string(),
                    workspace.server_name().to_string(),
                    pid,
                    workspace.docs.open_uris().await,
                ));
            }
        }
        out
    }
}

/// A cheap handle naming one (root, server) pair inside the session. All
/// LSP traffic from handlers flows through these.
pub struct WorkspaceHandle<'a> {
    session: &'a Session,
    root: PathBuf,
    server_name: String,
    spec: &'static ServerSpec,
}

impl WorkspaceHandle<'_> {
    async fn parts(&self) -> Result<(Arc<LspClient>, Arc<DocumentTracker>), LspError> {
        let workspaces = self.session.workspaces.read().await;
        let workspace = workspaces
            .get(&self.root)
            .and_then(|servers| servers.get(&self.server_name))
            .ok_or(LspError::Restarted)?;
        let client = workspace.client.clone().ok_or(LspError::ServerDead)?;
        Ok((client, workspace.docs.clone()))
    }

    pub async fn client(&self) -> Result<Arc<LspClient>, LspError> {
        Ok(self.parts().await?.0)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn wait_for_ready(&self, timeout_secs: u64) -> bool {
        match self.client().await {
            Ok(client) => client.wait_for_ready(timeout_secs).await,
            Err(_) => false,
        }
    }

    /// Ensure the server's view of `path` matches disk. Returns the synced
    /// content hash.
    pub async fn ensure_document_open(&self, path: &Path) -> Result<String, LspError> {
        let (client, docs) = self.parts().await?;
        open_document(&client, &docs, self.spec, path).await
    }

    pub async fn close_document(&self, path: &Path) {
        if let Ok((client, docs)) = self.parts().await {
            close_document(&client, &docs, path).await;
        }
    }

    pub async fn change_document(&self, path: &Path, new_content: &str) -> Result<(), LspError> {
        let (client, docs) = self.parts().await?;
        change_document(&client, &docs, path, new_content).await
    }

    pub async fn is_document_open(&self, path: &Path) -> bool {
        match self.parts().await {
            Ok((_, docs)) => docs.is_open(&path_to_uri(path).to_string()).await,
            Err(_) => false,
        }
    }

    pub async fn capabilities(&self) -> Result<serde_json::Value, LspError> {
        Ok(self.client().await?.capabilities().await)
    }

    /// Capability gate: error with the taxonomy's NotSupported when the
    /// probe comes back false.
    pub async fn require_capability(
        &self,
        capability: &str,
        probe: impl Fn(&serde_json::Value) -> bool,
    ) -> Result<(), LspError> {
        let caps = self.capabilities().await?;
        if probe(&caps) {
            Ok(())
        } else {
            warn!(server = %self.server_name, capability, "capability missing");
            Err(LspError::NotSupported {
                capability: capability.to_string(),
                server: self.server_name.clone(),
            })
        }
    }

    pub async fn restart_after_rename_if_needed(&self) {
        if self.spec.quirks.restart_after_rename {
            info!(server = %self.server_name, "restarting server to refresh index after rename");
            let _ = self.session.restart_workspace(&self.root).await;
        }
    }
}
