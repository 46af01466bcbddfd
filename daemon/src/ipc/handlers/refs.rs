// SPDX-License-Identifier: MIT
//! Location-list operations: `refs`, `declaration`, `implementations`,
//! `subtypes`, `supertypes`. Each resolves to the server primitive of the
//! same name, gated on the advertised capability.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use leta_proto::{LocationHit, LocationsParams, LocationsResult, RpcError, SymbolKind};

use crate::lsp::capabilities;
use crate::session::WorkspaceHandle;
use crate::text::{lines_around, read_file_content, relative_path, uri_to_path};

use super::{format_locations, locations_from_value, position_params, HandlerContext};

async fn open_target<'a>(
    ctx: &'a HandlerContext,
    params: &LocationsParams,
) -> Result<(WorkspaceHandle<'a>, PathBuf, PathBuf), RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    let file_path = PathBuf::from(&params.path);
    let workspace = ctx
        .session
        .workspace_for_file(&file_path, &workspace_root)
        .await?;
    workspace.ensure_document_open(&file_path).await?;
    Ok((workspace, workspace_root, file_path))
}

pub async fn handle_references(
    ctx: &HandlerContext,
    params: LocationsParams,
) -> Result<LocationsResult, RpcError> {
    let (workspace, workspace_root, file_path) = open_target(ctx, &params).await?;
    workspace
        .require_capability("textDocument/references", capabilities::supports_references)
        .await?;

    let mut request = position_params(&file_path, params.line, params.column);
    request["context"] = json!({"includeDeclaration": true});

    let response = workspace
        .client()
        .await?
        .request_value("textDocument/references", request)
        .await;
    workspace.close_document(&file_path).await;
    let response = response?;

    let locations = locations_from_value(&response);
    Ok(LocationsResult {
        locations: format_locations(&locations, &workspace_root, params.context),
        warning: None,
    })
}

pub async fn handle_declaration(
    ctx: &HandlerContext,
    params: LocationsParams,
) -> Result<LocationsResult, RpcError> {
    goto_style(ctx, params, "textDocument/declaration", |caps| {
        capabilities::supports_declaration(caps)
    })
    .await
}

pub async fn handle_implementations(
    ctx: &HandlerContext,
    params: LocationsParams,
) -> Result<LocationsResult, RpcError> {
    goto_style(ctx, params, "textDocument/implementation", |caps| {
        capabilities::supports_implementation(caps)
    })
    .await
}

async fn goto_style(
    ctx: &HandlerContext,
    params: LocationsParams,
    method: &str,
    probe: impl Fn(&Value) -> bool,
) -> Result<LocationsResult, RpcError> {
    let (workspace, workspace_root, file_path) = open_target(ctx, &params).await?;
    workspace.require_capability(method, probe).await?;

    let response = workspace
        .client()
        .await?
        .request_value(method, position_params(&file_path, params.line, params.column))
        .await;
    workspace.close_document(&file_path).await;
    let response = response?;

    let locations = locations_from_value(&response);
    Ok(LocationsResult {
        locations: format_locations(&locations, &workspace_root, params.context),
        warning: None,
    })
}

pub async fn handle_subtypes(
    ctx: &HandlerContext,
    params: LocationsParams,
) -> Result<LocationsResult, RpcError> {
    type_hierarchy(ctx, params, "typeHierarchy/subtypes").await
}

pub async fn handle_supertypes(
    ctx: &HandlerContext,
    params: LocationsParams,
) -> Result<LocationsResult, RpcError> {
    type_hierarchy(ctx, params, "typeHierarchy/supertypes").await
}

/// Two-step protocol: `prepareTypeHierarchy` at the position yields items;
/// the direction request expands the first item one level.
async fn type_hierarchy(
    ctx: &HandlerContext,
    params: LocationsParams,
    direction: &str,
) -> Result<LocationsResult, RpcError> {
    let (workspace, workspace_root, file_path) = open_target(ctx, &params).await?;
    workspace
        .require_capability(
            "textDocument/prepareTypeHierarchy",
            capabilities::supports_type_hierarchy,
        )
        .await?;

    let client = workspace.client().await?;
    let prepared = client
        .request_value(
            "textDocument/prepareTypeHierarchy",
            position_params(&file_path, params.line, params.column),
        )
        .await;
    let prepared = match prepared {
        Ok(v) => v,
        Err(e) => {
            workspace.close_document(&file_path).await;
            return Err(e.into());
        }
    };

    let items = prepared.as_array().cloned().unwrap_or_default();
    let Some(item) = items.first() else {
        workspace.close_document(&file_path).await;
        return Ok(LocationsResult {
            locations: Vec::new(),
            warning: None,
        });
    };

    let response = client
        .request_value(direction, json!({"item": item}))
        .await;
    workspace.close_document(&file_path).await;
    let response = response?;

    let related = response.as_array().cloned().unwrap_or_default();
    Ok(LocationsResult {
        locations: hierarchy_items_to_hits(&related, &workspace_root, params.context),
        warning: None,
    })
}

/// TypeHierarchyItem[] → location hits, deduplicated by (path, line).
fn hierarchy_items_to_hits(
    items: &[Value],
    workspace_root: &Path,
    context: u32,
) -> Vec<LocationHit> {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    let mut out = Vec::new();

    for item in items {
        let Some(uri) = item.get("uri").and_then(|u| u.as_str()) else {
            continue;
        };
        let Ok(uri) = uri.parse::<lsp_types::Uri>() else {
            continue;
        };
        let Some(name) = item.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let line = item
            .pointer("/selectionRange/start/line")
            .and_then(|l| l.as_u64())
            .unwrap_or(0) as u32
            + 1;
        let column = item
            .pointer("/selectionRange/start/character")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32;
        let kind = item
            .get("kind")
            .and_then(|k| k.as_u64())
            .map(|k| SymbolKind::from_lsp_int(k as u32));

        let file_path = uri_to_path(&uri);
        let rel_path = relative_path(&file_path, workspace_root);
        if !seen.insert((rel_path.clone(), line)) {
            continue;
        }

        let mut hit = LocationHit {
            path: rel_path,
            line,
            column,
            name: Some(name.to_string()),
            kind,
            detail: item
                .get("detail")
                .and_then(|d| d.as_str())
                .map(str::to_string),
            context_start: None,
            context_lines: None,
        };
        if context > 0 && file_path.exists() {
            if let Ok(content) = read_file_content(&file_path) {
                let (lines, start, _) =
                    lines_around(&content, line.saturating_sub(1) as usize, context as usize);
                hit.context_lines = Some(lines);
                hit.context_start = Some(start as u32 + 1);
            }
        }
        out.push(hit);
    }

    out.sort_by(|a, b| (&a.path, a.line).cmp(&(&b.path, b.line)));
    out
}
