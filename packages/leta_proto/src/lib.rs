//! Wire types shared between the leta CLI and the letad daemon.
//!
//! Everything that crosses the IPC socket lives here: the request/response
//! envelope, the stable error taxonomy, and the per-operation parameter and
//! result shapes. The daemon and CLI crates both depend on this package so
//! the two sides cannot drift apart.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ─── Envelope ────────────────────────────────────────────────────────────────

/// A single IPC request. One request per connection, length-prefixed JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub op: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(op: &str, params: Value) -> Self {
        Self {
            op: op.to_string(),
            params,
        }
    }
}

/// A single IPC response: either a success payload or a taxonomy error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: Value },
    Err { error: RpcError },
}

impl Response {
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        Response::Ok {
            ok: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    pub fn err(error: RpcError) -> Self {
        Response::Err { error }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self {
            Response::Ok { ok } => Ok(ok),
            Response::Err { error } => Err(error),
        }
    }
}

// ─── Error taxonomy ──────────────────────────────────────────────────────────

/// Stable, user-visible error kinds. The CLI prints `Error: <kind>: <detail>`
/// and maps every kind to exit code 1 (2 and 3 are produced client-side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    NotFound,
    Ambiguous,
    NotSupported,
    TimedOut,
    ServerDead,
    Restarted,
    ProtocolError,
    ServerError,
    IoError,
    UsageError,
    SignatureChanged,
    PathNotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Ambiguous => "Ambiguous",
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::ServerDead => "ServerDead",
            ErrorKind::Restarted => "Restarted",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::IoError => "IoError",
            ErrorKind::UsageError => "UsageError",
            ErrorKind::SignatureChanged => "SignatureChanged",
            ErrorKind::PathNotFound => "PathNotFound",
        };
        f.write_str(s)
    }
}

/// The error payload carried over IPC.
///
/// `candidates` is only populated for `Ambiguous`: the CLI renders each
/// candidate's `reference` so the user can paste an unambiguous expression
/// back as the next argument.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {detail}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<SymbolHit>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            candidates: Vec::new(),
        }
    }

    pub fn ambiguous(detail: impl Into<String>, candidates: Vec<SymbolHit>) -> Self {
        Self {
            kind: ErrorKind::Ambiguous,
            detail: detail.into(),
            candidates,
        }
    }
}

// ─── Symbols ─────────────────────────────────────────────────────────────────

/// Symbol kinds, mirroring the 26 LSP symbol kinds by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    File,
    Module,
    Namespace,
    Package,
    Class,
    Method,
    Property,
    Field,
    Constructor,
    Enum,
    Interface,
    Function,
    Variable,
    Constant,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Key,
    Null,
    EnumMember,
    Struct,
    Event,
    Operator,
    TypeParameter,
}

impl SymbolKind {
    /// Map the LSP integer encoding (1-based, LSP 3.17 §5.4) to a kind.
    /// Unknown values fall back to `Variable`.
    pub fn from_lsp_int(n: u32) -> Self {
        use SymbolKind::*;
        match n {
            1 => File,
            2 => Module,
            3 => Namespace,
            4 => Package,
            5 => Class,
            6 => Method,
            7 => Property,
            8 => Field,
            9 => Constructor,
            10 => Enum,
            11 => Interface,
            12 => Function,
            13 => Variable,
            14 => Constant,
            15 => String,
            16 => Number,
            17 => Boolean,
            18 => Array,
            19 => Object,
            20 => Key,
            21 => Null,
            22 => EnumMember,
            23 => Struct,
            24 => Event,
            25 => Operator,
            26 => TypeParameter,
            _ => Variable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use SymbolKind::*;
        match self {
            File => "File",
            Module => "Module",
            Namespace => "Namespace",
            Package => "Package",
            Class => "Class",
            Method => "Method",
            Property => "Property",
            Field => "Field",
            Constructor => "Constructor",
            Enum => "Enum",
            Interface => "Interface",
            Function => "Function",
            Variable => "Variable",
            Constant => "Constant",
            String => "String",
            Number => "Number",
            Boolean => "Boolean",
            Array => "Array",
            Object => "Object",
            Key => "Key",
            Null => "Null",
            EnumMember => "EnumMember",
            Struct => "Struct",
            Event => "Event",
            Operator => "Operator",
            TypeParameter => "TypeParameter",
        }
    }

    /// Kinds that users usually mean when a name collides with a backing
    /// variable or field; used by the resolver for disambiguation.
    pub fn is_type_like(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::Module
                | SymbolKind::Namespace
                | SymbolKind::Package
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            SymbolKind::Function | SymbolKind::Method | SymbolKind::Constructor
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use SymbolKind::*;
        match s.to_lowercase().as_str() {
            "file" => Ok(File),
            "module" => Ok(Module),
            "namespace" => Ok(Namespace),
            "package" => Ok(Package),
            "class" => Ok(Class),
            "method" => Ok(Method),
            "property" => Ok(Property),
            "field" => Ok(Field),
            "constructor" => Ok(Constructor),
            "enum" => Ok(Enum),
            "interface" => Ok(Interface),
            "function" => Ok(Function),
            "variable" => Ok(Variable),
            "constant" => Ok(Constant),
            "string" => Ok(String),
            "number" => Ok(Number),
            "boolean" => Ok(Boolean),
            "array" => Ok(Array),
            "object" => Ok(Object),
            "key" => Ok(Key),
            "null" => Ok(Null),
            "enummember" | "enum_member" => Ok(EnumMember),
            "struct" => Ok(Struct),
            "event" => Ok(Event),
            "operator" => Ok(Operator),
            "typeparameter" | "type_parameter" => Ok(TypeParameter),
            other => Err(format!("unknown symbol kind: {other}")),
        }
    }
}

/// One matched symbol, as returned by grep / resolve / ambiguity listings.
/// Paths are workspace-relative; lines are 1-based, columns are byte offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolHit {
    pub name: String,
    pub kind: SymbolKind,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end_line: Option<u32>,
    /// Shortest expression that resolves uniquely back to this symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A source location in a result list (references, implementations, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationHit {
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_lines: Option<Vec<String>>,
}

// ─── grep ────────────────────────────────────────────────────────────────────

pub const DEFAULT_HEAD_LIMIT: u32 = 500;

fn default_head_limit() -> u32 {
    DEFAULT_HEAD_LIMIT
}

fn default_pattern() -> String {
    ".*".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepParams {
    pub workspace_root: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub include_docs: bool,
    #[serde(default = "default_head_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepResult {
    #[serde(default)]
    pub symbols: Vec<SymbolHit>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// ─── files ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesParams {
    pub workspace_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub filter_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub lines: u32,
    pub bytes: u64,
    #[serde(default)]
    pub symbols: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesResult {
    pub files: BTreeMap<String, FileInfo>,
    pub total_files: u32,
    pub total_bytes: u64,
    pub total_lines: u32,
}

// ─── resolve-symbol ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveParams {
    pub workspace_root: String,
    pub expr: String,
}

/// A uniquely resolved symbol. Resolution failures travel as `NotFound` or
/// `Ambiguous` taxonomy errors, never as a success payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSymbol {
    /// Absolute path of the defining file.
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end_line: Option<u32>,
}

// ─── show ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowParams {
    pub workspace_root: String,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub context: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end_line: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowResult {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<u32>,
}

// ─── location-list operations (refs / declaration / impls / sub / super) ─────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsParams {
    pub workspace_root: String,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub context: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsResult {
    #[serde(default)]
    pub locations: Vec<LocationHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// ─── calls ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallsMode {
    Outgoing,
    Incoming,
    Path,
}

fn default_max_depth() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsParams {
    pub workspace_root: String,
    pub mode: CallsMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_symbol: Option<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub include_non_workspace: bool,
}

/// One node of a call tree or call path. `children` are callees for
/// outgoing mode and callers for incoming mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<CallNode>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<CallNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<CallNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ─── diagnostics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hint,
    Information,
    Warning,
    Error,
}

impl Severity {
    /// LSP DiagnosticSeverity: 1 = error … 4 = hint.
    pub fn from_lsp_int(n: u32) -> Self {
        match n {
            1 => Severity::Error,
            2 => Severity::Warning,
            4 => Severity::Hint,
            _ => Severity::Information,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "information",
            Severity::Hint => "hint",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "information" | "info" => Ok(Severity::Information),
            "hint" => Ok(Severity::Hint),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsParams {
    pub workspace_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInfo {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResult {
    #[serde(default)]
    pub diagnostics: Vec<DiagnosticInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// ─── rename / mv ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    pub workspace_root: String,
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResult {
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFileParams {
    pub workspace_root: String,
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFileResult {
    pub files_changed: Vec<String>,
    pub imports_updated: bool,
}

// ─── format / organize-imports ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatParams {
    pub workspace_root: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatResult {
    pub path: String,
    pub edits_applied: u32,
}

// ─── replace-function ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceFunctionParams {
    pub workspace_root: String,
    pub expr: String,
    pub new_body: String,
    #[serde(default = "default_true")]
    pub check_signature: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceFunctionResult {
    pub path: String,
    pub old_range: String,
    pub new_range: String,
    pub lines_replaced: u32,
}

// ─── workspace management ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceParams {
    pub workspace_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWorkspaceResult {
    pub added: bool,
    pub workspace_root: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveWorkspaceResult {
    pub servers_stopped: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartWorkspaceResult {
    pub restarted: Vec<String>,
}

// ─── daemon info / shutdown ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub current_bytes: u64,
    pub max_bytes: u64,
    pub entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub root: String,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_pid: Option<u32>,
    #[serde(default)]
    pub open_documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeResult {
    pub daemon_pid: u32,
    pub version: String,
    pub symbol_cache: CacheInfo,
    pub hover_cache: CacheInfo,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownResult {
    pub status: String,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_ok_roundtrip() {
        let resp = Response::ok(&ShutdownResult {
            status: "shutting_down".into(),
        });
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        let value = back.into_result().unwrap();
        assert_eq!(value["status"], "shutting_down");
    }

    #[test]
    fn response_err_roundtrip_preserves_kind() {
        let resp = Response::err(RpcError::new(ErrorKind::TimedOut, "references timed out"));
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        let err = back.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::TimedOut);
        assert_eq!(err.detail, "references timed out");
        assert!(err.candidates.is_empty());
    }

    #[test]
    fn ambiguous_error_carries_candidates() {
        let hit = SymbolHit {
            name: "save".into(),
            kind: SymbolKind::Method,
            path: "editable.ts".into(),
            line: 12,
            column: 4,
            container: Some("EditablePerson".into()),
            detail: None,
            docs: None,
            range_start_line: None,
            range_end_line: None,
            reference: Some("EditablePerson.save".into()),
        };
        let resp = Response::err(RpcError::ambiguous("Symbol 'save' is ambiguous", vec![hit]));
        let back: Response =
            serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        let err = back.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ambiguous);
        assert_eq!(err.candidates.len(), 1);
        assert_eq!(err.candidates[0].reference.as_deref(), Some("EditablePerson.save"));
    }

    #[test]
    fn symbol_kind_lsp_mapping() {
        assert_eq!(SymbolKind::from_lsp_int(5), SymbolKind::Class);
        assert_eq!(SymbolKind::from_lsp_int(12), SymbolKind::Function);
        assert_eq!(SymbolKind::from_lsp_int(23), SymbolKind::Struct);
        assert_eq!(SymbolKind::from_lsp_int(0), SymbolKind::Variable);
        assert_eq!(SymbolKind::from_lsp_int(99), SymbolKind::Variable);
    }

    #[test]
    fn symbol_kind_parses_case_insensitively() {
        assert_eq!("class".parse::<SymbolKind>().unwrap(), SymbolKind::Class);
        assert_eq!("Struct".parse::<SymbolKind>().unwrap(), SymbolKind::Struct);
        assert_eq!(
            "enum_member".parse::<SymbolKind>().unwrap(),
            SymbolKind::EnumMember
        );
        assert!("widget".parse::<SymbolKind>().is_err());
    }

    #[test]
    fn severity_ordering_supports_floor_filtering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Information);
        assert!(Severity::Information > Severity::Hint);
        assert_eq!(Severity::from_lsp_int(1), Severity::Error);
        assert_eq!(Severity::from_lsp_int(4), Severity::Hint);
    }

    #[test]
    fn grep_params_defaults() {
        let params: GrepParams =
            serde_json::from_str(r#"{"workspaceRoot": "/w"}"#).unwrap();
        assert_eq!(params.pattern, ".*");
        assert_eq!(params.limit, DEFAULT_HEAD_LIMIT);
        assert!(!params.case_sensitive);
        assert!(params.exclude_patterns.is_empty());
    }

    #[test]
    fn calls_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&CallsMode::Outgoing).unwrap(), "\"outgoing\"");
        assert_eq!(serde_json::to_string(&CallsMode::Path).unwrap(), "\"path\"");
    }
}
