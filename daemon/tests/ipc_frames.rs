// SPDX-License-Identifier: MIT
//! Framing tests for the CLI↔daemon channel.

use serde_json::json;
use tokio::io::duplex;

use leta_proto::{Request, Response, RpcError};
use letad::ipc::{read_frame, write_frame};

#[tokio::test]
async fn frame_roundtrip() {
    let (mut a, mut b) = duplex(4096);

    let request = Request::new("grep", json!({"workspaceRoot": "/w", "pattern": "Handler$"}));
    let bytes = serde_json::to_vec(&request).unwrap();
    write_frame(&mut a, &bytes).await.unwrap();

    let received = read_frame(&mut b).await.unwrap();
    let parsed: Request = serde_json::from_slice(&received).unwrap();
    assert_eq!(parsed.op, "grep");
    assert_eq!(parsed.params["pattern"], "Handler$");
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let (mut a, mut b) = duplex(4096);
    // Length prefix far above the limit; no body needed.
    let huge = (u32::MAX).to_be_bytes();
    tokio::io::AsyncWriteExt::write_all(&mut a, &huge).await.unwrap();

    let err = read_frame(&mut b).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn response_envelope_roundtrips_over_frames() {
    let (mut a, mut b) = duplex(4096);

    let response = Response::err(RpcError::new(
        leta_proto::ErrorKind::NotFound,
        "Symbol 'missing' not found",
    ));
    let bytes = serde_json::to_vec(&response).unwrap();
    write_frame(&mut a, &bytes).await.unwrap();

    let received = read_frame(&mut b).await.unwrap();
    let parsed: Response = serde_json::from_slice(&received).unwrap();
    let err = parsed.into_result().unwrap_err();
    assert_eq!(err.kind, leta_proto::ErrorKind::NotFound);
}

#[tokio::test]
async fn consecutive_frames_stay_separate() {
    let (mut a, mut b) = duplex(4096);

    for i in 0..3u32 {
        let bytes = serde_json::to_vec(&json!({"n": i})).unwrap();
        write_frame(&mut a, &bytes).await.unwrap();
    }
    for i in 0..3u32 {
        let frame = read_frame(&mut b).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["n"], i);
    }
}
