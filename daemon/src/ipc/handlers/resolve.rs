// SPDX-License-Identifier: MIT
//! `resolve-symbol` — resolve a symbol expression to a unique location.
//! The CLI resolves first, then issues the targeted operation with the
//! returned position.

use std::path::PathBuf;

use leta_proto::{ResolveParams, ResolvedSymbol, RpcError};

use super::{resolve_expr, HandlerContext};

pub async fn handle_resolve_symbol(
    ctx: &HandlerContext,
    params: ResolveParams,
) -> Result<ResolvedSymbol, RpcError> {
    let workspace_root = PathBuf::from(&params.workspace_root);
    resolve_expr(ctx, &workspace_root, &params.expr).await
}
