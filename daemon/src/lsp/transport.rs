// SPDX-License-Identifier: MIT
//! JSON-RPC framing for the LSP stdio transport.
//!
//! Every message is `Content-Length: <n>\r\n` + optional extra headers +
//! `\r\n` + exactly n bytes of UTF-8 JSON. The reader tolerates and ignores
//! headers it does not know, loops on partial reads, and holds at most one
//! frame in memory at a time.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed")]
    ConnectionClosed,
}

/// Frame a serializable message for the wire.
pub fn encode_message<T: serde::Serialize>(message: &T) -> Vec<u8> {
    let body = serde_json::to_vec(message).expect("message serializes");
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend(body);
    out
}

/// Read one complete message. Errors with `MalformedFrame` when the header
/// block ends without a numeric Content-Length.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Value, FrameError> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = header_value(trimmed, "Content-Length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| FrameError::MalformedFrame(trimmed.to_string()))?,
            );
        }
        // Content-Type and anything else: ignored.
    }

    let length = content_length
        .ok_or_else(|| FrameError::MalformedFrame("missing Content-Length header".to_string()))?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn decode(bytes: &[u8]) -> Result<Value, FrameError> {
        let mut reader = BufReader::new(bytes);
        read_message(&mut reader).await
    }

    #[tokio::test]
    async fn roundtrip_preserves_message() {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "textDocument/documentSymbol",
            "params": {"textDocument": {"uri": "file:///tmp/a.rs"}}
        });
        let decoded = decode(&encode_message(&msg)).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn roundtrip_preserves_non_ascii_payloads() {
        let msg = json!({"name": "héllo 𝕏", "nested": [1, 2, {"k": null}]});
        let decoded = decode(&encode_message(&msg)).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn unknown_headers_are_ignored() {
        let body = br#"{"ok":true}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\nX-Custom: yes\r\n\r\n",
            body.len()
        );
        let mut bytes = frame.into_bytes();
        bytes.extend_from_slice(body);
        let decoded = decode(&bytes).await.unwrap();
        assert_eq!(decoded, json!({"ok": true}));
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive() {
        let body = br#"{}"#;
        let mut bytes = format!("content-length: {}\r\n\r\n", body.len()).into_bytes();
        bytes.extend_from_slice(body);
        assert!(decode(&bytes).await.is_ok());
    }

    #[tokio::test]
    async fn missing_content_length_is_malformed() {
        let bytes = b"Content-Type: application/json\r\n\r\n{}";
        match decode(bytes).await {
            Err(FrameError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_numeric_content_length_is_malformed() {
        let bytes = b"Content-Length: banana\r\n\r\n{}";
        match decode(bytes).await {
            Err(FrameError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_before_headers_is_connection_closed() {
        match decode(b"").await {
            Err(FrameError::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_consecutive_frames_decode_independently() {
        let a = json!({"id": 1});
        let b = json!({"id": 2});
        let mut bytes = encode_message(&a);
        bytes.extend(encode_message(&b));
        let mut reader = BufReader::new(bytes.as_slice());
        assert_eq!(read_message(&mut reader).await.unwrap(), a);
        assert_eq!(read_message(&mut reader).await.unwrap(), b);
    }
}
