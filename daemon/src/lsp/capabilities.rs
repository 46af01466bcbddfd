// SPDX-License-Identifier: MIT
//! Client capability advertisement and server capability queries.
//!
//! The client capability set is deliberately curated: it announces the
//! features we consume (hierarchical document symbols, workspace edits with
//! resource operations, fileOperations.willRename, call/type hierarchy) and
//! omits anything that makes servers push work back at a headless client —
//! no dynamic registration, no workspace-folder change notifications, no
//! snippet completion.
//!
//! Server capabilities are checked against the raw `initialize` result JSON
//! rather than typed structs: several fields (typeHierarchyProvider among
//! them) postdate the typed bindings, and servers encode most providers as
//! `true | {options}` unions anyway.

use serde_json::{json, Value};

pub fn client_capabilities() -> Value {
    json!({
        "workspace": {
            "workspaceEdit": {
                "documentChanges": true,
                "resourceOperations": ["create", "rename", "delete"]
            },
            "fileOperations": {
                "willRename": true
            },
            "configuration": true
        },
        "textDocument": {
            "synchronization": {
                "didSave": true,
                "willSave": false,
                "willSaveWaitUntil": false
            },
            "documentSymbol": {
                "hierarchicalDocumentSymbolSupport": true,
                "symbolKind": {
                    "valueSet": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13,
                                 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26]
                }
            },
            "definition": {"linkSupport": true},
            "declaration": {"linkSupport": true},
            "implementation": {"linkSupport": true},
            "typeDefinition": {"linkSupport": true},
            "references": {"dynamicRegistration": false},
            "rename": {"prepareSupport": true, "dynamicRegistration": false},
            "hover": {"contentFormat": ["markdown", "plaintext"]},
            "callHierarchy": {"dynamicRegistration": false},
            "typeHierarchy": {"dynamicRegistration": false},
            "formatting": {"dynamicRegistration": false},
            "codeAction": {
                "codeActionLiteralSupport": {
                    "codeActionKind": {"valueSet": ["source.organizeImports"]}
                }
            },
            "publishDiagnostics": {"relatedInformation": false}
        },
        "window": {
            "workDoneProgress": true
        },
        "general": {
            "positionEncodings": ["utf-16"]
        }
    })
}

/// True when a provider field is present and not `null`/`false`.
/// Providers are `bool | object` unions on the wire.
fn provider_enabled(caps: &Value, field: &str) -> bool {
    match caps.get(field) {
        None => false,
        Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

pub fn supports_document_symbol(caps: &Value) -> bool {
    provider_enabled(caps, "documentSymbolProvider")
}

pub fn supports_references(caps: &Value) -> bool {
    provider_enabled(caps, "referencesProvider")
}

pub fn supports_declaration(caps: &Value) -> bool {
    provider_enabled(caps, "declarationProvider")
}

pub fn supports_implementation(caps: &Value) -> bool {
    provider_enabled(caps, "implementationProvider")
}

pub fn supports_call_hierarchy(caps: &Value) -> bool {
    provider_enabled(caps, "callHierarchyProvider")
}

pub fn supports_type_hierarchy(caps: &Value) -> bool {
    provider_enabled(caps, "typeHierarchyProvider")
}

pub fn supports_rename(caps: &Value) -> bool {
    provider_enabled(caps, "renameProvider")
}

pub fn supports_hover(caps: &Value) -> bool {
    provider_enabled(caps, "hoverProvider")
}

pub fn supports_formatting(caps: &Value) -> bool {
    provider_enabled(caps, "documentFormattingProvider")
}

/// Organize-imports needs a code action provider; when the server lists
/// supported kinds, `source.organizeImports` must be among them.
pub fn supports_organize_imports(caps: &Value) -> bool {
    match caps.get("codeActionProvider") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(options) => match options.get("codeActionKinds").and_then(|k| k.as_array()) {
            None => true,
            Some(kinds) => kinds.iter().any(|k| {
                k.as_str()
                    .map(|s| s == "source.organizeImports" || s == "source")
                    .unwrap_or(false)
            }),
        },
    }
}

/// `workspace.fileOperations.willRename` is a registration-options object.
pub fn supports_will_rename_files(caps: &Value) -> bool {
    caps.pointer("/workspace/fileOperations/willRename")
        .map(|v| !v.is_null())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curated_capabilities_omit_dynamic_registration() {
        let caps = client_capabilities();
        assert_eq!(
            caps.pointer("/textDocument/references/dynamicRegistration"),
            Some(&Value::Bool(false))
        );
        assert!(caps.pointer("/workspace/didChangeWatchedFiles").is_none());
        assert!(caps.pointer("/workspace/workspaceFolders").is_none());
    }

    #[test]
    fn provider_union_shapes() {
        let caps = json!({
            "referencesProvider": true,
            "renameProvider": {"prepareProvider": true},
            "implementationProvider": false,
            "declarationProvider": null
        });
        assert!(supports_references(&caps));
        assert!(supports_rename(&caps));
        assert!(!supports_implementation(&caps));
        assert!(!supports_declaration(&caps));
        assert!(!supports_type_hierarchy(&caps));
    }

    #[test]
    fn organize_imports_checks_declared_kinds() {
        let plain = json!({"codeActionProvider": true});
        assert!(supports_organize_imports(&plain));

        let with_kind = json!({
            "codeActionProvider": {"codeActionKinds": ["quickfix", "source.organizeImports"]}
        });
        assert!(supports_organize_imports(&with_kind));

        let without_kind = json!({
            "codeActionProvider": {"codeActionKinds": ["quickfix", "refactor"]}
        });
        assert!(!supports_organize_imports(&without_kind));
    }

    #[test]
    fn will_rename_is_nested_under_file_operations() {
        let caps = json!({
            "workspace": {"fileOperations": {"willRename": {"filters": []}}}
        });
        assert!(supports_will_rename_files(&caps));
        assert!(!supports_will_rename_files(&json!({"workspace": {}})));
    }
}
