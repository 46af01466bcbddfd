// SPDX-License-Identifier: MIT
//! Daemon transport for the CLI: auto-spawn, framed request/response, and
//! the error split that drives exit codes.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use leta_proto::{Request, Response, RpcError};
use letad::config::{log_dir, socket_path};
use letad::pidfile::is_daemon_running;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);
const SPAWN_WAIT_ATTEMPTS: u32 = 50;

/// CLI-side failure classification. `Unreachable` exits 3, `Handled`
/// (anything the daemon reported) exits 1.
#[derive(Debug)]
pub enum CliError {
    Unreachable(String),
    Handled(RpcError),
    Io(String),
}

impl From<RpcError> for CliError {
    fn from(err: RpcError) -> Self {
        CliError::Handled(err)
    }
}

/// Spawn `letad` (a sibling of the current executable, falling back to
/// PATH) if no live daemon is discoverable, and wait for its socket.
pub async fn ensure_daemon_running() -> Result<(), CliError> {
    let socket = socket_path();
    if is_daemon_running() {
        return Ok(());
    }

    let sibling: Option<PathBuf> = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("letad")))
        .filter(|p| p.exists());
    let daemon_exe = sibling.unwrap_or_else(|| PathBuf::from("letad"));

    Command::new(&daemon_exe)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            CliError::Unreachable(format!("failed to start {}: {e}", daemon_exe.display()))
        })?;

    for _ in 0..SPAWN_WAIT_ATTEMPTS {
        if socket.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(CliError::Unreachable(
        "daemon did not come up within 5 seconds".to_string(),
    ))
}

/// One request, one response. Appends the daemon log tail to internal
/// errors so failures are debuggable from the terminal.
pub async fn send_request(op: &str, params: Value) -> Result<Value, CliError> {
    let socket = socket_path();

    let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&socket))
        .await
        .map_err(|_| CliError::Unreachable("timed out connecting to daemon".to_string()))?
        .map_err(|e| CliError::Unreachable(format!("cannot connect to daemon: {e}")))?;

    let (mut read_half, mut write_half) = stream.into_split();

    let request = Request::new(op, params);
    let bytes = serde_json::to_vec(&request).map_err(|e| CliError::Io(e.to_string()))?;
    write_frame(&mut write_half, &bytes)
        .await
        .map_err(|e| CliError::Io(e.to_string()))?;

    let frame = tokio::time::timeout(RESPONSE_TIMEOUT, read_frame(&mut read_half))
        .await
        .map_err(|_| CliError::Io(format!("timed out waiting for daemon response ({op})")))?
        .map_err(|e| CliError::Io(e.to_string()))?;

    let response: Response =
        serde_json::from_slice(&frame).map_err(|e| CliError::Io(e.to_string()))?;

    match response.into_result() {
        Ok(payload) => Ok(payload),
        Err(mut error) => {
            if error.kind == leta_proto::ErrorKind::IoError
                || error.kind == leta_proto::ErrorKind::ProtocolError
            {
                if let Some(tail) = daemon_log_tail() {
                    error.detail = format!("{}\n\nRecent daemon log:\n{tail}", error.detail);
                }
            }
            Err(CliError::Handled(error))
        }
    }
}

async fn read_frame(reader: &mut tokio::net::unix::OwnedReadHalf) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_frame(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    bytes: &[u8],
) -> std::io::Result<()> {
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

fn daemon_log_tail() -> Option<String> {
    let content = std::fs::read_to_string(log_dir().join("daemon.log")).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    let tail: Vec<&str> = lines.iter().rev().take(15).rev().copied().collect();
    if tail.is_empty() {
        None
    } else {
        Some(tail.join("\n"))
    }
}
