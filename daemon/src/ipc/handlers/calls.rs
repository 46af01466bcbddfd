// SPDX-License-Identifier: MIT
//! `calls` — call-hierarchy traversal.
//!
//! Outgoing and incoming modes build a bounded-depth tree from the
//! server's call hierarchy. Path mode runs a breadth-first search over
//! outgoing calls from `--from` toward `--to` and reports the first
//! (shortest) path found; exhaustion is the `PathNotFound` taxonomy error.
//! Call sites outside every workspace (stdlib, vendored dependencies) are
//! filtered unless `--include-non-workspace` is set.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use leta_proto::{CallNode, CallsMode, CallsParams, CallsResult, ErrorKind, RpcError, SymbolKind};

use crate::lsp::{capabilities, LspClient};
use crate::text::{relative_path, uri_to_path};

use super::{position_params, HandlerContext};

pub async fn handle_calls(ctx: &HandlerContext, params: CallsParams) -> Result<CallsResult, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);

    match params.mode {
        CallsMode::Outgoing => {
            let (client, item) = prepare(
                ctx,
                &workspace_root,
                params.from_path.as_deref(),
                params.from_line,
                params.from_column,
            )
            .await?;
            let Some(item) = item else {
                return Ok(no_item_result());
            };

            let mut visited = HashSet::new();
            let children = expand(
                &client,
                &item,
                "callHierarchy/outgoingCalls",
                "to",
                &workspace_root,
                0,
                params.max_depth,
                params.include_non_workspace,
                &mut visited,
            )
            .await;

            let mut root = item_to_node(&item, &workspace_root);
            if !children.is_empty() {
                root.children = Some(children);
            }
            Ok(CallsResult {
                root: Some(root),
                path: None,
                message: None,
            })
        }

        CallsMode::Incoming => {
            let (client, item) = prepare(
                ctx,
                &workspace_root,
                params.to_path.as_deref(),
                params.to_line,
                params.to_column,
            )
            .await?;
            let Some(item) = item else {
                return Ok(no_item_result());
            };

            let mut visited = HashSet::new();
            let children = expand(
                &client,
                &item,
                "callHierarchy/incomingCalls",
                "from",
                &workspace_root,
                0,
                params.max_depth,
                params.include_non_workspace,
                &mut visited,
            )
            .await;

            let mut root = item_to_node(&item, &workspace_root);
            if !children.is_empty() {
                root.children = Some(children);
            }
            Ok(CallsResult {
                root: Some(root),
                path: None,
                message: None,
            })
        }

        CallsMode::Path => {
            let (client, from_item) = prepare(
                ctx,
                &workspace_root,
                params.from_path.as_deref(),
                params.from_line,
                params.from_column,
            )
            .await?;
            let (_, to_item) = prepare(
                ctx,
                &workspace_root,
                params.to_path.as_deref(),
                params.to_line,
                params.to_column,
            )
            .await?;

            let (Some(from_item), Some(to_item)) = (from_item, to_item) else {
                return Ok(no_item_result());
            };

            let target_key = item_key(&to_item);
            let found = shortest_path(
                &client,
                &from_item,
                &target_key,
                &workspace_root,
                params.max_depth,
                params.include_non_workspace,
            )
            .await;

            match found {
                Some(path) => Ok(CallsResult {
                    root: None,
                    path: Some(path),
                    message: None,
                }),
                None => Err(RpcError::new(
                    ErrorKind::PathNotFound,
                    format!(
                        "no call path from '{}' to '{}' within depth {}",
                        params.from_symbol.unwrap_or_default(),
                        params.to_symbol.unwrap_or_default(),
                        params.max_depth
                    ),
                )),
            }
        }
    }
}

fn no_item_result() -> CallsResult {
    CallsResult {
        root: None,
        path: None,
        message: Some("No call hierarchy item found at location".to_string()),
    }
}

/// Open the target and run `prepareCallHierarchy` at the position.
async fn prepare(
    ctx: &HandlerContext,
    workspace_root: &Path,
    path: Option<&str>,
    line: Option<u32>,
    column: Option<u32>,
) -> Result<(Arc<LspClient>, Option<Value>), RpcError> {
    let path = path.ok_or_else(|| {
        RpcError::new(ErrorKind::UsageError, "missing call hierarchy endpoint")
    })?;
    let line =
        line.ok_or_else(|| RpcError::new(ErrorKind::UsageError, "missing endpoint line"))?;
    let file_path = PathBuf::from(path);

    let workspace = ctx
        .session
        .workspace_for_file(&file_path, workspace_root)
        .await?;
    workspace
        .require_capability(
            "textDocument/prepareCallHierarchy",
            capabilities::supports_call_hierarchy,
        )
        .await?;
    workspace.ensure_document_open(&file_path).await?;

    let client = workspace.client().await?;
    let response = client
        .request_value(
            "textDocument/prepareCallHierarchy",
            position_params(&file_path, line, column.unwrap_or(0)),
        )
        .await?;

    let item = response
        .as_array()
        .and_then(|items| items.first().cloned());
    Ok((client, item))
}

fn item_key(item: &Value) -> String {
    format!(
        "{}:{}:{}",
        item.get("uri").and_then(|u| u.as_str()).unwrap_or(""),
        item.pointer("/range/start/line")
            .and_then(|l| l.as_u64())
            .unwrap_or(0),
        item.get("name").and_then(|n| n.as_str()).unwrap_or(""),
    )
}

/// Locations that belong to a language runtime or vendored dependency
/// rather than the user's workspace.
fn is_non_workspace_path(uri: &str) -> bool {
    uri.contains("/typeshed-fallback/stdlib/")
        || uri.contains("/typeshed/stdlib/")
        || (uri.contains("/libexec/src/") && !uri.contains("/mod/"))
        || (uri.ends_with(".d.ts")
            && uri
                .rsplit('/')
                .next()
                .map(|f| f.starts_with("lib."))
                .unwrap_or(false))
        || uri.contains("/rustlib/src/rust/library/")
}

fn item_to_node(item: &Value, workspace_root: &Path) -> CallNode {
    let uri = item
        .get("uri")
        .and_then(|u| u.as_str())
        .and_then(|u| u.parse::<lsp_types::Uri>().ok());
    let path = uri
        .map(|u| relative_path(&uri_to_path(&u), workspace_root))
        .unwrap_or_default();

    CallNode {
        name: item
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string(),
        kind: item
            .get("kind")
            .and_then(|k| k.as_u64())
            .map(|k| SymbolKind::from_lsp_int(k as u32)),
        detail: item
            .get("detail")
            .and_then(|d| d.as_str())
            .map(str::to_string),
        path,
        line: item
            .pointer("/selectionRange/start/line")
            .and_then(|l| l.as_u64())
            .unwrap_or(0) as u32
            + 1,
        column: item
            .pointer("/selectionRange/start/character")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32,
        children: None,
    }
}

/// Fetch one level of related items for `item` in the given direction.
async fn related_items(client: &Arc<LspClient>, item: &Value, method: &str, side: &str) -> Vec<Value> {
    let response = client
        .request_value(method, json!({"item": item}))
        .await
        .unwrap_or(Value::Null);
    response
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| call.get(side).cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Depth-first expansion of a call tree. Cycles are cut with the visited
/// set; non-workspace call sites are filtered unless requested.
#[allow(clippy::too_many_arguments)]
async fn expand(
    client: &Arc<LspClient>,
    item: &Value,
    method: &str,
    side: &str,
    workspace_root: &Path,
    depth: u32,
    max_depth: u32,
    include_non_workspace: bool,
    visited: &mut HashSet<String>,
) -> Vec<CallNode> {
    if depth >= max_depth {
        return Vec::new();
    }
    if !visited.insert(item_key(item)) {
        return Vec::new();
    }

    let mut out = Vec::new();
    for related in related_items(client, item, method, side).await {
        let uri = related.get("uri").and_then(|u| u.as_str()).unwrap_or("");
        if !include_non_workspace && is_non_workspace_path(uri) {
            continue;
        }

        let mut node = item_to_node(&related, workspace_root);
        let children = Box::pin(expand(
            client,
            &related,
            method,
            side,
            workspace_root,
            depth + 1,
            max_depth,
            include_non_workspace,
            visited,
        ))
        .await;
        if !children.is_empty() {
            node.children = Some(children);
        }
        out.push(node);
    }
    out
}

/// Breadth-first search over outgoing calls; the first time the target key
/// surfaces, the discovery chain is the shortest path.
async fn shortest_path(
    client: &Arc<LspClient>,
    from: &Value,
    target_key: &str,
    workspace_root: &Path,
    max_depth: u32,
    include_non_workspace: bool,
) -> Option<Vec<CallNode>> {
    let from_key = item_key(from);
    if from_key == target_key {
        return Some(vec![item_to_node(from, workspace_root)]);
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(from_key);

    let mut frontier: VecDeque<(Value, Vec<CallNode>)> = VecDeque::new();
    frontier.push_back((from.clone(), vec![item_to_node(from, workspace_root)]));

    let mut depth = 0;
    while depth < max_depth && !frontier.is_empty() {
        let mut next: VecDeque<(Value, Vec<CallNode>)> = VecDeque::new();

        while let Some((item, path_so_far)) = frontier.pop_front() {
            for callee in related_items(client, &item, "callHierarchy/outgoingCalls", "to").await {
                let uri = callee.get("uri").and_then(|u| u.as_str()).unwrap_or("");
                if !include_non_workspace && is_non_workspace_path(uri) {
                    continue;
                }
                let key = item_key(&callee);
                if !visited.insert(key.clone()) {
                    continue;
                }

                let mut path = path_so_far.clone();
                path.push(item_to_node(&callee, workspace_root));
                if key == target_key {
                    return Some(path);
                }
                next.push_back((callee, path));
            }
        }

        frontier = next;
        depth += 1;
    }
    None
}
