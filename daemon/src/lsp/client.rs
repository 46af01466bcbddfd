// SPDX-License-Identifier: MIT
//! Async JSON-RPC client for one language server subprocess.
//!
//! Task layout per server: one writer task draining a bounded outbound
//! queue (all writes to the server are serialized through it), one reader
//! task matching responses to pending requests and fanning out
//! notifications, and one stderr-drain task appending to the per-server
//! log file. Request/response correlation uses monotonically increasing
//! u64 ids and oneshot completion slots; a timeout removes the pending slot
//! without killing the server, and reader-loop exit fails every in-flight
//! request with `ServerDead`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lsp_types::Uri;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::capabilities::client_capabilities;
use super::transport::{encode_message, read_message, FrameError};
use super::LspError;

const OUTBOUND_QUEUE_DEPTH: usize = 64;
const NOTIFICATION_FANOUT_DEPTH: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// An inbound server notification, as delivered by [`LspClient::notifications`].
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub method: String,
    pub params: Value,
}

#[derive(Serialize)]
struct OutgoingRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct OutgoingNotification<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct OutgoingResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

type PendingSlot = oneshot::Sender<Result<Value, LspError>>;

pub struct LspClient {
    server_name: String,
    outbound: mpsc::Sender<Vec<u8>>,
    pending: Mutex<HashMap<u64, PendingSlot>>,
    next_id: AtomicU64,
    request_timeout: Duration,
    alive: AtomicBool,
    pid: Option<u32>,
    process: Mutex<Option<Child>>,
    /// Raw `initialize` result capabilities. Kept as JSON: provider unions
    /// and post-bindings fields are easier to probe that way.
    capabilities: RwLock<Value>,
    initialized: RwLock<bool>,
    service_ready: RwLock<bool>,
    indexing_done: RwLock<bool>,
    progress_tokens: Mutex<HashSet<String>>,
    notifications_tx: broadcast::Sender<ServerNotification>,
}

impl LspClient {
    /// Spawn a language server subprocess and complete the
    /// `initialize`/`initialized` handshake. stderr is drained to
    /// `<log_dir>/<server>.log`.
    pub async fn spawn(
        command: &[String],
        root: &Path,
        server_name: &str,
        init_options: Option<Value>,
        request_timeout: Duration,
        log_dir: &Path,
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>, LspError> {
        let executable = command.first().ok_or_else(|| LspError::Spawn {
            server: server_name.to_string(),
            message: "empty command".to_string(),
        })?;

        let mut cmd = tokio::process::Command::new(executable);
        cmd.args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(root)
            .envs(env)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| LspError::Spawn {
            server: server_name.to_string(),
            message: format!("{executable}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| LspError::Spawn {
            server: server_name.to_string(),
            message: "child stdin not available".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| LspError::Spawn {
            server: server_name.to_string(),
            message: "child stdout not available".to_string(),
        })?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let client = Self::wire(stdout, stdin, server_name, request_timeout, pid, Some(child));

        if let Some(stderr) = stderr {
            let log_path = log_dir.join(format!("{server_name}.log"));
            let name = server_name.to_string();
            tokio::spawn(async move {
                drain_stderr(stderr, &name, &log_path).await;
            });
        }

        info!(server = server_name, pid, root = %root.display(), "language server spawned");
        client.handshake(root, init_options).await?;
        Ok(client)
    }

    /// Build a client over an arbitrary transport. Used by tests to drive
    /// the protocol against a scripted in-process server; `spawn` routes
    /// through here with the child's pipes.
    pub fn from_transport<R, W>(
        reader: R,
        writer: W,
        server_name: &str,
        request_timeout: Duration,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::wire(reader, writer, server_name, request_timeout, None, None)
    }

    fn wire<R, W>(
        reader: R,
        writer: W,
        server_name: &str,
        request_timeout: Duration,
        pid: Option<u32>,
        process: Option<Child>,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE_DEPTH);
        let (notifications_tx, _) = broadcast::channel(NOTIFICATION_FANOUT_DEPTH);

        let client = Arc::new(Self {
            server_name: server_name.to_string(),
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            request_timeout,
            alive: AtomicBool::new(true),
            pid,
            process: Mutex::new(process),
            capabilities: RwLock::new(Value::Null),
            initialized: RwLock::new(false),
            // jdtls signals readiness via language/status ServiceReady;
            // rust-analyzer via experimental/serverStatus quiescence.
            // Everything else is assumed ready once progress tokens drain.
            service_ready: RwLock::new(server_name != "jdtls"),
            indexing_done: RwLock::new(server_name != "rust-analyzer"),
            progress_tokens: Mutex::new(HashSet::new()),
            notifications_tx,
        });

        tokio::spawn(write_loop(outbound_rx, writer, server_name.to_string()));

        let reader_client = Arc::clone(&client);
        tokio::spawn(async move {
            reader_client.read_loop(reader).await;
        });

        client
    }

    /// Complete the `initialize`/`initialized` handshake and cache the
    /// server's advertised capabilities.
    pub async fn handshake(&self, root: &Path, init_options: Option<Value>) -> Result<(), LspError> {
        let root_uri: Uri = crate::text::path_to_uri(root);
        let workspace_name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace");

        let params = json!({
            "processId": std::process::id(),
            "clientInfo": {"name": "leta", "version": env!("CARGO_PKG_VERSION")},
            "rootUri": root_uri.as_str(),
            "rootPath": root.display().to_string(),
            "capabilities": client_capabilities(),
            "workspaceFolders": [{"uri": root_uri.as_str(), "name": workspace_name}],
            "initializationOptions": init_options,
        });

        let result = self.request_value("initialize", params).await?;
        if let Some(caps) = result.get("capabilities") {
            *self.capabilities.write().await = caps.clone();
        }
        self.notify("initialized", json!({})).await?;
        *self.initialized.write().await = true;
        Ok(())
    }

    // ─── Requests and notifications ──────────────────────────────────────────

    /// Send a request and deserialize the result.
    pub async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, LspError> {
        let value = self
            .request_value(method, serde_json::to_value(params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a request and return the raw result value.
    pub async fn request_value(&self, method: &str, params: Value) -> Result<Value, LspError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(LspError::ServerDead);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let encoded = encode_message(&OutgoingRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        });
        debug!(server = %self.server_name, id, method, "lsp request");

        if self.outbound.send(encoded).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(LspError::ServerDead);
        }

        let outcome = tokio::time::timeout(self.request_timeout, rx).await;
        match outcome {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(server = %self.server_name, id, method, "lsp request timed out");
                Err(LspError::TimedOut {
                    method: method.to_string(),
                    seconds: self.request_timeout.as_secs(),
                })
            }
            Ok(Err(_)) => Err(LspError::ServerDead),
            Ok(Ok(result)) => result,
        }
    }

    /// Fire-and-forget notification. Only fails when the server is gone.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), LspError> {
        let encoded = encode_message(&OutgoingNotification {
            jsonrpc: "2.0",
            method,
            params,
        });
        debug!(server = %self.server_name, method, "lsp notification");
        self.outbound
            .send(encoded)
            .await
            .map_err(|_| LspError::ServerDead)
    }

    /// Subscribe to the inbound notification stream. Restartable: each call
    /// returns a fresh receiver positioned at the current tail.
    pub fn notifications(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications_tx.subscribe()
    }

    // ─── Reader side ─────────────────────────────────────────────────────────

    async fn read_loop<R: AsyncRead + Unpin>(&self, reader: R) {
        let mut reader = BufReader::new(reader);

        loop {
            match read_message(&mut reader).await {
                Ok(message) => self.handle_message(message).await,
                Err(FrameError::ConnectionClosed) => {
                    debug!(server = %self.server_name, "lsp connection closed");
                    break;
                }
                Err(e) => {
                    error!(server = %self.server_name, err = %e, "lsp read error");
                    break;
                }
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        let mut pending = self.pending.lock().await;
        for (_, slot) in pending.drain() {
            let _ = slot.send(Err(LspError::ServerDead));
        }
    }

    async fn handle_message(&self, message: Value) {
        let id = message.get("id").cloned();
        let method = message
            .get("method")
            .and_then(|m| m.as_str())
            .map(str::to_string);

        match (id, method) {
            (Some(id), Some(method)) => self.answer_server_request(id, &method, message).await,
            (Some(id), None) => {
                let id_num = id
                    .as_u64()
                    .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
                    .unwrap_or(0);
                self.complete_request(id_num, message).await;
            }
            (None, Some(method)) => self.handle_notification(&method, message).await,
            (None, None) => {
                warn!(server = %self.server_name, "message with neither id nor method");
            }
        }
    }

    async fn complete_request(&self, id: u64, message: Value) {
        let Some(slot) = self.pending.lock().await.remove(&id) else {
            warn!(server = %self.server_name, id, "response for unknown request");
            return;
        };

        if let Some(err) = message.get("error") {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let text = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown server error")
                .to_string();
            debug!(server = %self.server_name, id, code, "lsp error response");
            let _ = slot.send(Err(LspError::Server {
                code,
                message: text,
            }));
        } else {
            let result = message.get("result").cloned().unwrap_or(Value::Null);
            let _ = slot.send(Ok(result));
        }
    }

    /// Server→client requests get canned minimal answers so the server can
    /// proceed; the reader loop never waits on anything here.
    async fn answer_server_request(&self, id: Value, method: &str, message: Value) {
        debug!(server = %self.server_name, method, "server request");
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let response = match method {
            "workspace/configuration" => {
                let items = params
                    .get("items")
                    .and_then(|i| i.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0);
                OutgoingResponse {
                    jsonrpc: "2.0",
                    id,
                    result: Some(Value::Array(vec![json!({}); items])),
                    error: None,
                }
            }
            "window/workDoneProgress/create" | "client/registerCapability"
            | "client/unregisterCapability" => OutgoingResponse {
                jsonrpc: "2.0",
                id,
                result: Some(Value::Null),
                error: None,
            },
            "window/showMessageRequest" => {
                let first_action = params
                    .get("actions")
                    .and_then(|a| a.as_array())
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Value::Null);
                OutgoingResponse {
                    jsonrpc: "2.0",
                    id,
                    result: Some(first_action),
                    error: None,
                }
            }
            "workspace/applyEdit" => OutgoingResponse {
                jsonrpc: "2.0",
                id,
                result: Some(json!({"applied": true})),
                error: None,
            },
            _ => OutgoingResponse {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(json!({"code": -32601, "message": format!("method not found: {method}")})),
            },
        };

        if self.outbound.send(encode_message(&response)).await.is_err() {
            error!(server = %self.server_name, "failed to answer server request");
        }
    }

    async fn handle_notification(&self, method: &str, message: Value) {
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method {
            // jdtls readiness signal.
            "language/status" => {
                if params.get("type").and_then(|t| t.as_str()) == Some("ServiceReady") {
                    info!(server = %self.server_name, "ServiceReady");
                    *self.service_ready.write().await = true;
                }
            }
            // rust-analyzer quiescence signal.
            "experimental/serverStatus" => {
                let quiescent = params
                    .get("quiescent")
                    .and_then(|q| q.as_bool())
                    .unwrap_or(false);
                let health = params
                    .get("health")
                    .and_then(|h| h.as_str())
                    .unwrap_or("ok");
                *self.indexing_done.write().await = quiescent && health != "error";
            }
            "$/progress" => self.track_progress(&params).await,
            // log/telemetry chatter is consumed and dropped.
            "window/logMessage" | "telemetry/event" | "$/logTrace" => {}
            _ => {}
        }

        let _ = self.notifications_tx.send(ServerNotification {
            method: method.to_string(),
            params,
        });
    }

    async fn track_progress(&self, params: &Value) {
        // rust-analyzer's quiescence comes from serverStatus, not progress.
        if self.server_name == "rust-analyzer" {
            return;
        }

        let Some(token) = params.get("token") else {
            return;
        };
        let token = match token {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return,
        };
        let kind = params
            .pointer("/value/kind")
            .and_then(|k| k.as_str())
            .unwrap_or("");

        let mut tokens = self.progress_tokens.lock().await;
        match kind {
            "begin" => {
                tokens.insert(token);
                *self.indexing_done.write().await = false;
            }
            "end" => {
                tokens.remove(&token);
                if tokens.is_empty() {
                    *self.indexing_done.write().await = true;
                }
            }
            _ => {}
        }
    }

    // ─── State queries ───────────────────────────────────────────────────────

    /// Wait until the server reports itself indexed and ready, or the
    /// timeout passes. Returns whether readiness was reached.
    pub async fn wait_for_ready(&self, timeout_secs: u64) -> bool {
        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        loop {
            if *self.indexing_done.read().await && *self.service_ready.read().await {
                return true;
            }
            if start.elapsed() >= timeout {
                warn!(server = %self.server_name, "timed out waiting for readiness");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn capabilities(&self) -> Value {
        self.capabilities.read().await.clone()
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Fail every in-flight request with `Restarted`. Called by the session
    /// layer just before a workspace restart tears this client down, so
    /// callers can distinguish a restart from a server crash.
    pub async fn fail_pending_restarted(&self) {
        let mut pending = self.pending.lock().await;
        for (_, slot) in pending.drain() {
            let _ = slot.send(Err(LspError::Restarted));
        }
    }

    /// Graceful shutdown: `shutdown` request, `exit` notification, then
    /// terminate the process after a short grace period.
    pub async fn stop(&self) {
        if *self.initialized.read().await {
            let _ = tokio::time::timeout(
                SHUTDOWN_GRACE,
                self.request_value("shutdown", Value::Null),
            )
            .await;
            let _ = self.notify("exit", Value::Null).await;
        }

        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(server = %self.server_name, "server did not exit, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut writer: W,
    server_name: String,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            error!(server = %server_name, err = %e, "lsp write error");
            break;
        }
        if let Err(e) = writer.flush().await {
            error!(server = %server_name, err = %e, "lsp flush error");
            break;
        }
    }
    // Close stdin so a stuck server sees EOF.
    let _ = writer.shutdown().await;
}

/// Route server stderr into its log file line by line.
async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R, server_name: &str, log_path: &Path) {
    if let Some(parent) = log_path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let mut log = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(server = server_name, err = %e, "cannot open server log file");
            None
        }
    };

    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if let Some(f) = log.as_mut() {
                    let _ = f.write_all(line.as_bytes()).await;
                }
            }
        }
    }
}
