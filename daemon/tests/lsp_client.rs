// SPDX-License-Identifier: MIT
//! Protocol-level tests for the LSP client, driven against a scripted
//! in-process server over a duplex pipe — no real language servers needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{duplex, AsyncWriteExt, BufReader, DuplexStream};

use letad::lsp::{transport, LspClient, LspError};

/// Drive the server side of the pipe: for every inbound message, the
/// handler returns zero or more messages to send back.
fn spawn_scripted_server<F>(io: DuplexStream, mut on_message: F)
where
    F: FnMut(&Value) -> Vec<Value> + Send + 'static,
{
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(io);
        let mut reader = BufReader::new(read);
        loop {
            match transport::read_message(&mut reader).await {
                Ok(message) => {
                    for reply in on_message(&message) {
                        let bytes = transport::encode_message(&reply);
                        if write.write_all(&bytes).await.is_err() {
                            return;
                        }
                        let _ = write.flush().await;
                    }
                }
                Err(_) => return,
            }
        }
    });
}

fn client_for(io: DuplexStream, timeout: Duration) -> Arc<LspClient> {
    let (read, write) = tokio::io::split(io);
    LspClient::from_transport(read, write, "scripted", timeout)
}

fn response_to(message: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": message["id"], "result": result})
}

#[tokio::test]
async fn request_receives_matching_response() {
    let (client_io, server_io) = duplex(64 * 1024);
    spawn_scripted_server(server_io, |msg| {
        if msg["method"] == "textDocument/hover" {
            vec![response_to(msg, json!({"contents": "fn main()"}))]
        } else {
            vec![]
        }
    });
    let client = client_for(client_io, Duration::from_secs(5));

    let result = client
        .request_value("textDocument/hover", json!({}))
        .await
        .unwrap();
    assert_eq!(result["contents"], "fn main()");
}

#[tokio::test]
async fn request_ids_are_strictly_increasing_and_unique() {
    let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
    let seen_server = Arc::clone(&seen);

    let (client_io, server_io) = duplex(64 * 1024);
    spawn_scripted_server(server_io, move |msg| {
        if let Some(id) = msg["id"].as_u64() {
            seen_server.lock().unwrap().push(id);
            vec![response_to(msg, Value::Null)]
        } else {
            vec![]
        }
    });
    let client = client_for(client_io, Duration::from_secs(5));

    for _ in 0..4 {
        client.request_value("test/ping", json!({})).await.unwrap();
    }

    let ids = seen.lock().unwrap().clone();
    assert_eq!(ids.len(), 4);
    for pair in ids.windows(2) {
        assert!(pair[1] > pair[0], "ids must strictly increase: {ids:?}");
    }
}

#[tokio::test]
async fn responses_out_of_order_route_to_the_right_caller() {
    let (client_io, server_io) = duplex(64 * 1024);
    let pending: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let pending_server = Arc::clone(&pending);

    spawn_scripted_server(server_io, move |msg| {
        if msg["method"] == "first" {
            // Hold the first request until the second arrives.
            pending_server.lock().unwrap().push(msg.clone());
            vec![]
        } else if msg["method"] == "second" {
            let held = pending_server.lock().unwrap().pop().unwrap();
            vec![
                response_to(msg, json!("second-result")),
                response_to(&held, json!("first-result")),
            ]
        } else {
            vec![]
        }
    });
    let client = client_for(client_io, Duration::from_secs(5));

    let c1 = Arc::clone(&client);
    let first = tokio::spawn(async move { c1.request_value("first", json!({})).await });
    // Make sure "first" is on the wire before "second".
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = client.request_value("second", json!({})).await.unwrap();

    assert_eq!(second, json!("second-result"));
    assert_eq!(first.await.unwrap().unwrap(), json!("first-result"));
}

#[tokio::test]
async fn timeout_surfaces_and_does_not_wedge_the_client() {
    let (client_io, server_io) = duplex(64 * 1024);
    spawn_scripted_server(server_io, |msg| {
        if msg["method"] == "fast" {
            vec![response_to(msg, json!("ok"))]
        } else {
            vec![] // never answer "slow"
        }
    });
    let client = client_for(client_io, Duration::from_millis(200));

    match client.request_value("slow", json!({})).await {
        Err(LspError::TimedOut { method, .. }) => assert_eq!(method, "slow"),
        other => panic!("expected TimedOut, got {other:?}"),
    }

    // The timed-out slot is gone; the client still works.
    let result = client.request_value("fast", json!({})).await.unwrap();
    assert_eq!(result, json!("ok"));
}

#[tokio::test]
async fn server_error_response_is_typed() {
    let (client_io, server_io) = duplex(64 * 1024);
    spawn_scripted_server(server_io, |msg| {
        vec![json!({
            "jsonrpc": "2.0",
            "id": msg["id"],
            "error": {"code": -32601, "message": "method not found"}
        })]
    });
    let client = client_for(client_io, Duration::from_secs(5));

    match client.request_value("anything", json!({})).await {
        Err(LspError::Server { code, message }) => {
            assert_eq!(code, -32601);
            assert_eq!(message, "method not found");
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_connection_fails_future_requests_fast() {
    let (client_io, server_io) = duplex(64 * 1024);
    drop(server_io);
    let client = client_for(client_io, Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(100)).await;

    match client.request_value("any", json!({})).await {
        Err(LspError::ServerDead) => {}
        other => panic!("expected ServerDead, got {other:?}"),
    }
    assert!(!client.is_alive());
}

#[tokio::test]
async fn pending_request_fails_when_server_exits_mid_flight() {
    let (client_io, server_io) = duplex(64 * 1024);
    tokio::spawn(async move {
        let (read, _write) = tokio::io::split(server_io);
        let mut reader = BufReader::new(read);
        // Read the request, then drop both halves.
        let _ = transport::read_message(&mut reader).await;
    });
    let client = client_for(client_io, Duration::from_secs(5));

    match client.request_value("doomed", json!({})).await {
        Err(LspError::ServerDead) => {}
        other => panic!("expected ServerDead, got {other:?}"),
    }
}

#[tokio::test]
async fn server_requests_get_canned_replies() {
    let (client_io, server_io) = duplex(64 * 1024);
    let replies: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let replies_server = Arc::clone(&replies);

    spawn_scripted_server(server_io, move |msg| {
        if msg["method"] == "client/kick" {
            // In response to the client's request, first ask things of the
            // client, then answer.
            vec![
                json!({"jsonrpc": "2.0", "id": 900, "method": "workspace/configuration",
                       "params": {"items": [{}, {}]}}),
                json!({"jsonrpc": "2.0", "id": 901, "method": "window/showMessageRequest",
                       "params": {"message": "pick", "actions": [{"title": "Yes"}, {"title": "No"}]}}),
                response_to(msg, json!("done")),
            ]
        } else if msg["id"] == json!(900) || msg["id"] == json!(901) {
            replies_server.lock().unwrap().push(msg.clone());
            vec![]
        } else {
            vec![]
        }
    });
    let client = client_for(client_io, Duration::from_secs(5));

    let result = client.request_value("client/kick", json!({})).await.unwrap();
    assert_eq!(result, json!("done"));

    // Let the canned replies drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 2);

    let config_reply = replies.iter().find(|r| r["id"] == json!(900)).unwrap();
    assert_eq!(config_reply["result"], json!([{}, {}]));

    let message_reply = replies.iter().find(|r| r["id"] == json!(901)).unwrap();
    assert_eq!(message_reply["result"], json!({"title": "Yes"}));
}

#[tokio::test]
async fn notifications_stream_delivers_diagnostics() {
    let (client_io, server_io) = duplex(64 * 1024);
    spawn_scripted_server(server_io, |msg| {
        if msg["method"] == "textDocument/didOpen" {
            vec![json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///w/a.rs", "diagnostics": [{"message": "oops"}]}
            })]
        } else {
            vec![]
        }
    });
    let client = client_for(client_io, Duration::from_secs(5));

    let mut notifications = client.notifications();
    client
        .notify("textDocument/didOpen", json!({"textDocument": {"uri": "file:///w/a.rs"}}))
        .await
        .unwrap();

    let notification =
        tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .expect("notification within deadline")
            .unwrap();
    assert_eq!(notification.method, "textDocument/publishDiagnostics");
    assert_eq!(notification.params["uri"], "file:///w/a.rs");
    assert_eq!(notification.params["diagnostics"][0]["message"], "oops");
}

#[tokio::test]
async fn handshake_caches_server_capabilities() {
    let (client_io, server_io) = duplex(64 * 1024);
    let saw_initialized = Arc::new(Mutex::new(false));
    let saw = Arc::clone(&saw_initialized);

    spawn_scripted_server(server_io, move |msg| {
        match msg["method"].as_str() {
            Some("initialize") => {
                // The client must advertise hierarchical document symbols.
                assert_eq!(
                    msg.pointer("/params/capabilities/textDocument/documentSymbol/hierarchicalDocumentSymbolSupport"),
                    Some(&json!(true))
                );
                vec![response_to(
                    msg,
                    json!({"capabilities": {
                        "referencesProvider": true,
                        "renameProvider": {"prepareProvider": true},
                        "typeHierarchyProvider": true
                    }}),
                )]
            }
            Some("initialized") => {
                *saw.lock().unwrap() = true;
                vec![]
            }
            _ => vec![],
        }
    });
    let client = client_for(client_io, Duration::from_secs(5));

    client.handshake(std::path::Path::new("/tmp"), None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(*saw_initialized.lock().unwrap());

    let caps = client.capabilities().await;
    assert_eq!(caps["referencesProvider"], json!(true));
    assert!(letad::lsp::capabilities::supports_type_hierarchy(&caps));
    assert!(letad::lsp::capabilities::supports_rename(&caps));
    assert!(!letad::lsp::capabilities::supports_call_hierarchy(&caps));
}

#[tokio::test]
async fn restart_fails_pending_with_restarted() {
    let (client_io, server_io) = duplex(64 * 1024);
    spawn_scripted_server(server_io, |_msg| vec![]); // never answers
    let client = client_for(client_io, Duration::from_secs(30));

    let c = Arc::clone(&client);
    let in_flight = tokio::spawn(async move { c.request_value("hang", json!({})).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.fail_pending_restarted().await;

    match in_flight.await.unwrap() {
        Err(LspError::Restarted) => {}
        other => panic!("expected Restarted, got {other:?}"),
    }
}
