// SPDX-License-Identifier: MIT
//! leta — command-line LSP client.
//!
//! Short-lived front-end: parse arguments, make sure the daemon is up,
//! resolve symbol expressions, issue the operation, render the result.

mod client;
mod output;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use leta_proto as proto;
use leta_proto::{ErrorKind, ResolvedSymbol, RpcError};
use letad::config::{config_path, detect_workspace_root, socket_path, Config};
use letad::pidfile::is_daemon_running;

use client::{ensure_daemon_running, send_request, CliError};

const ABOUT: &str = "\
leta is a command-line LSP client. It searches symbols across large code
bases with regular expressions, prints full function and method bodies,
finds references, implementations, and subtypes, and refactors with
rename, file moves, and function-body replacement — all backed by real
language servers kept warm in a daemon.

`leta grep` matches symbol names, not file contents; use ripgrep for text
search. `leta files` is a good starting point on a new project. `leta show
SYMBOL` prints a full definition body.

Symbol expressions accept `Name`, `Parent.Name`, `path:Name`, and
`path:line:Name`.";

#[derive(Parser)]
#[command(name = "leta", about = ABOUT, version)]
struct Cli {
    /// Output as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for symbols matching a regex pattern.
    Grep {
        /// Regex matched against symbol names.
        pattern: String,
        /// Regex filter on workspace-relative paths.
        path_regex: Option<String>,
        /// Filter by symbol kind (repeatable).
        #[arg(short = 'k', long = "kind", action = clap::ArgAction::Append)]
        kinds: Vec<String>,
        /// Exclude paths matching this regex (repeatable).
        #[arg(short = 'x', long = "exclude", action = clap::ArgAction::Append)]
        exclude: Vec<String>,
        /// Fetch documentation for each match.
        #[arg(short = 'd', long)]
        docs: bool,
        /// Case-sensitive matching.
        #[arg(short = 'C', long)]
        case_sensitive: bool,
        /// Stop after this many matches.
        #[arg(long, default_value_t = proto::DEFAULT_HEAD_LIMIT)]
        head: u32,
    },

    /// Show the source file tree with symbol and line counts.
    Files {
        path: Option<String>,
        /// Exclude glob (repeatable).
        #[arg(short = 'x', long = "exclude", action = clap::ArgAction::Append)]
        exclude: Vec<String>,
        /// Re-include a default-excluded directory (repeatable).
        #[arg(short = 'i', long = "include", action = clap::ArgAction::Append)]
        include: Vec<String>,
        /// Only list files matching this glob (repeatable).
        #[arg(short = 'f', long = "filter", action = clap::ArgAction::Append)]
        filter: Vec<String>,
    },

    /// Print the full body of a symbol.
    Show {
        symbol: String,
        /// Lines of surrounding context.
        #[arg(short = 'n', long, default_value_t = 0)]
        context: u32,
        /// Maximum lines to print.
        #[arg(long, default_value_t = 200)]
        head: u32,
    },

    /// Find all references to a symbol.
    Refs {
        symbol: String,
        #[arg(short = 'n', long, default_value_t = 0)]
        context: u32,
    },

    /// Show the call hierarchy of a symbol, or a path between two.
    Calls {
        /// Starting symbol (outgoing calls).
        #[arg(long)]
        from: Option<String>,
        /// Target symbol (incoming calls).
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 3)]
        max_depth: u32,
        /// Include stdlib and dependency call sites.
        #[arg(long)]
        include_non_workspace: bool,
    },

    /// Find implementations of an interface or abstract method.
    Implementations {
        symbol: String,
        #[arg(short = 'n', long, default_value_t = 0)]
        context: u32,
    },

    /// Find direct subtypes of a type.
    Subtypes {
        symbol: String,
        #[arg(short = 'n', long, default_value_t = 0)]
        context: u32,
    },

    /// Find direct supertypes of a type.
    Supertypes {
        symbol: String,
        #[arg(short = 'n', long, default_value_t = 0)]
        context: u32,
    },

    /// Find the declaration of a symbol.
    Declaration {
        symbol: String,
        #[arg(short = 'n', long, default_value_t = 0)]
        context: u32,
    },

    /// List diagnostics for a file or the whole workspace.
    Diagnostics {
        path: Option<String>,
        /// Minimum severity (error, warning, information, hint).
        #[arg(short = 's', long)]
        severity: Option<String>,
    },

    /// Rename a symbol across the workspace.
    Rename { symbol: String, new_name: String },

    /// Move or rename a file and update imports.
    Mv { old_path: String, new_path: String },

    /// Format a file with the language server.
    Format { path: String },

    /// Organize imports in a file.
    #[command(name = "organize-imports")]
    OrganizeImports { path: String },

    /// Replace a function's body (new body from --body-file or stdin).
    #[command(name = "replace-function")]
    ReplaceFunction {
        symbol: String,
        /// Read the replacement body from this file instead of stdin.
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Skip the signature comparison safety check.
        #[arg(long)]
        no_check_signature: bool,
    },

    /// Manage workspaces.
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },

    /// Manage the leta daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Print the config file location and contents.
    Config,
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// Register a workspace root (defaults to the detected project root).
    Add {
        #[arg(long)]
        root: Option<String>,
    },
    /// Unregister a workspace and stop its language servers.
    Remove {
        #[arg(long)]
        root: Option<String>,
    },
    /// Restart the language servers of a workspace.
    Restart {
        #[arg(long)]
        root: Option<String>,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon.
    Start,
    /// Stop the daemon.
    Stop,
    /// Restart the daemon.
    Restart,
    /// Show daemon state, caches, and active workspaces.
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Handled(error)) => {
            eprintln!("{}", output::format_error(&error));
            ExitCode::from(1)
        }
        Err(CliError::Io(message)) => {
            eprintln!("Error: IoError: {message}");
            ExitCode::from(1)
        }
        Err(CliError::Unreachable(message)) => {
            eprintln!("Error: daemon unreachable: {message}");
            ExitCode::from(3)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Daemon { command } => handle_daemon(command).await,
        Commands::Workspace { command } => handle_workspace(command).await,
        Commands::Config => handle_config(),
        other => {
            ensure_daemon_running().await?;
            let config = load_config()?;
            dispatch(other, &config, cli.json).await
        }
    }
}

fn load_config() -> Result<Config, CliError> {
    Config::load().map_err(|e| CliError::Io(e.to_string()))
}

fn workspace_root_for_cwd(config: &Config) -> Result<PathBuf, CliError> {
    let cwd = std::env::current_dir().map_err(|e| CliError::Io(e.to_string()))?;
    config
        .enclosing_workspace_root(&cwd, Some(&cwd))
        .ok_or_else(|| {
            CliError::Handled(RpcError::new(
                ErrorKind::NotFound,
                "no workspace registered for the current directory; run: leta workspace add",
            ))
        })
}

fn workspace_root_for_path(config: &Config, path: &Path) -> Result<PathBuf, CliError> {
    let cwd = std::env::current_dir().map_err(|e| CliError::Io(e.to_string()))?;
    config
        .enclosing_workspace_root(path, Some(&cwd))
        .ok_or_else(|| {
            CliError::Handled(RpcError::new(
                ErrorKind::NotFound,
                format!(
                    "no workspace registered for {}; run: leta workspace add",
                    path.display()
                ),
            ))
        })
}

async fn resolve_symbol(root: &Path, expr: &str) -> Result<ResolvedSymbol, CliError> {
    let params = proto::ResolveParams {
        workspace_root: root.to_string_lossy().to_string(),
        expr: expr.to_string(),
    };
    let value = send_request("resolve-symbol", to_value(&params)?).await?;
    from_value(value)
}

fn to_value<T: serde::Serialize>(params: &T) -> Result<Value, CliError> {
    serde_json::to_value(params).map_err(|e| CliError::Io(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, CliError> {
    serde_json::from_value(value).map_err(|e| CliError::Io(e.to_string()))
}

fn print_payload<T: serde::Serialize>(
    json_output: bool,
    payload: &T,
    plain: impl FnOnce(&T) -> String,
) -> Result<(), CliError> {
    if json_output {
        let text =
            serde_json::to_string_pretty(payload).map_err(|e| CliError::Io(e.to_string()))?;
        println!("{text}");
    } else {
        let text = plain(payload);
        if !text.is_empty() {
            println!("{text}");
        }
    }
    Ok(())
}

async fn locations_op(
    op: &str,
    config: &Config,
    json_output: bool,
    symbol: &str,
    context: u32,
) -> Result<(), CliError> {
    let root = workspace_root_for_cwd(config)?;
    let resolved = resolve_symbol(&root, symbol).await?;
    let params = proto::LocationsParams {
        workspace_root: root.to_string_lossy().to_string(),
        path: resolved.path,
        line: resolved.line,
        column: resolved.column,
        context,
    };
    let value = send_request(op, to_value(&params)?).await?;
    let result: proto::LocationsResult = from_value(value)?;
    print_payload(json_output, &result, output::format_locations)
}

async fn dispatch(command: Commands, config: &Config, json_output: bool) -> Result<(), CliError> {
    match command {
        Commands::Grep {
            pattern,
            path_regex,
            kinds,
            exclude,
            docs,
            case_sensitive,
            head,
        } => {
            if pattern.contains(' ') {
                eprintln!(
                    "Warning: the pattern has whitespace in it — grep only ever matches \
                     single symbol names; reach for ripgrep when you need full-text search"
                );
            }
            let root = workspace_root_for_cwd(config)?;
            let params = proto::GrepParams {
                workspace_root: root.to_string_lossy().to_string(),
                pattern,
                path_pattern: path_regex,
                kinds: if kinds.is_empty() { None } else { Some(kinds) },
                exclude_patterns: exclude,
                case_sensitive,
                include_docs: docs,
                limit: head,
            };
            let value = send_request("grep", to_value(&params)?).await?;
            let result: proto::GrepResult = from_value(value)?;
            print_payload(json_output, &result, |r| output::format_grep(r, docs))
        }

        Commands::Files {
            path,
            exclude,
            include,
            filter,
        } => {
            let (root, subpath) = match path {
                Some(path) => {
                    let target = PathBuf::from(&path)
                        .canonicalize()
                        .map_err(|e| CliError::Io(format!("{path}: {e}")))?;
                    let root = workspace_root_for_path(config, &target)?;
                    (root, Some(target.to_string_lossy().to_string()))
                }
                None => (workspace_root_for_cwd(config)?, None),
            };
            let params = proto::FilesParams {
                workspace_root: root.to_string_lossy().to_string(),
                subpath,
                exclude_patterns: exclude,
                include_patterns: include,
                filter_patterns: filter,
            };
            let value = send_request("files", to_value(&params)?).await?;
            let result: proto::FilesResult = from_value(value)?;
            print_payload(json_output, &result, output::format_files)
        }

        Commands::Show {
            symbol,
            context,
            head,
        } => {
            let root = workspace_root_for_cwd(config)?;
            let resolved = resolve_symbol(&root, &symbol).await?;
            let params = proto::ShowParams {
                workspace_root: root.to_string_lossy().to_string(),
                path: resolved.path,
                line: resolved.line,
                column: resolved.column,
                context,
                head: Some(head),
                symbol: Some(symbol),
                kind: Some(resolved.kind),
                range_start_line: resolved.range_start_line,
                range_end_line: resolved.range_end_line,
            };
            let value = send_request("show", to_value(&params)?).await?;
            let result: proto::ShowResult = from_value(value)?;
            print_payload(json_output, &result, output::format_show)
        }

        Commands::Refs { symbol, context } => {
            locations_op("references", config, json_output, &symbol, context).await
        }
        Commands::Declaration { symbol, context } => {
            locations_op("declaration", config, json_output, &symbol, context).await
        }
        Commands::Implementations { symbol, context } => {
            locations_op("implementations", config, json_output, &symbol, context).await
        }
        Commands::Subtypes { symbol, context } => {
            locations_op("subtypes", config, json_output, &symbol, context).await
        }
        Commands::Supertypes { symbol, context } => {
            locations_op("supertypes", config, json_output, &symbol, context).await
        }

        Commands::Calls {
            from,
            to,
            max_depth,
            include_non_workspace,
        } => {
            if from.is_none() && to.is_none() {
                return Err(CliError::Handled(RpcError::new(
                    ErrorKind::UsageError,
                    "at least one of --from or --to is required",
                )));
            }
            let root = workspace_root_for_cwd(config)?;
            let root_str = root.to_string_lossy().to_string();

            let mut params = proto::CallsParams {
                workspace_root: root_str,
                mode: proto::CallsMode::Outgoing,
                from_path: None,
                from_line: None,
                from_column: None,
                from_symbol: from.clone(),
                to_path: None,
                to_line: None,
                to_column: None,
                to_symbol: to.clone(),
                max_depth,
                include_non_workspace,
            };

            if let Some(from_expr) = &from {
                let resolved = resolve_symbol(&root, from_expr).await?;
                params.from_path = Some(resolved.path);
                params.from_line = Some(resolved.line);
                params.from_column = Some(resolved.column);
            }
            if let Some(to_expr) = &to {
                let resolved = resolve_symbol(&root, to_expr).await?;
                params.to_path = Some(resolved.path);
                params.to_line = Some(resolved.line);
                params.to_column = Some(resolved.column);
            }
            params.mode = match (&from, &to) {
                (Some(_), Some(_)) => proto::CallsMode::Path,
                (Some(_), None) => proto::CallsMode::Outgoing,
                _ => proto::CallsMode::Incoming,
            };

            let value = send_request("calls", to_value(&params)?).await?;
            let result: proto::CallsResult = from_value(value)?;
            print_payload(json_output, &result, output::format_calls)
        }

        Commands::Diagnostics { path, severity } => {
            let severity = severity
                .map(|s| {
                    s.parse::<proto::Severity>().map_err(|e| {
                        CliError::Handled(RpcError::new(ErrorKind::UsageError, e))
                    })
                })
                .transpose()?;
            let (root, file) = match path {
                Some(path) => {
                    let target = PathBuf::from(&path)
                        .canonicalize()
                        .map_err(|e| CliError::Io(format!("{path}: {e}")))?;
                    let root = workspace_root_for_path(config, &target)?;
                    (root, Some(target.to_string_lossy().to_string()))
                }
                None => (workspace_root_for_cwd(config)?, None),
            };
            let params = proto::DiagnosticsParams {
                workspace_root: root.to_string_lossy().to_string(),
                path: file,
                severity,
            };
            let value = send_request("diagnostics", to_value(&params)?).await?;
            let result: proto::DiagnosticsResult = from_value(value)?;
            print_payload(json_output, &result, output::format_diagnostics)
        }

        Commands::Rename { symbol, new_name } => {
            let root = workspace_root_for_cwd(config)?;
            let resolved = resolve_symbol(&root, &symbol).await?;
            let params = proto::RenameParams {
                workspace_root: root.to_string_lossy().to_string(),
                path: resolved.path,
                line: resolved.line,
                column: resolved.column,
                new_name,
            };
            let value = send_request("rename", to_value(&params)?).await?;
            let result: proto::RenameResult = from_value(value)?;
            print_payload(json_output, &result, |r| {
                if r.files_changed.is_empty() {
                    "No files changed".to_string()
                } else {
                    format!("Changed files:\n  {}", r.files_changed.join("\n  "))
                }
            })
        }

        Commands::Mv { old_path, new_path } => {
            let old = PathBuf::from(&old_path)
                .canonicalize()
                .map_err(|e| CliError::Io(format!("{old_path}: {e}")))?;
            let new = std::env::current_dir()
                .map_err(|e| CliError::Io(e.to_string()))?
                .join(&new_path);
            let root = workspace_root_for_path(config, &old)?;
            let params = proto::MoveFileParams {
                workspace_root: root.to_string_lossy().to_string(),
                old_path: old.to_string_lossy().to_string(),
                new_path: new.to_string_lossy().to_string(),
            };
            let value = send_request("move-file", to_value(&params)?).await?;
            let result: proto::MoveFileResult = from_value(value)?;
            print_payload(json_output, &result, |r| {
                let mut text = format!("Moved; changed files:\n  {}", r.files_changed.join("\n  "));
                if !r.imports_updated {
                    text.push_str("\n(no import updates)");
                }
                text
            })
        }

        Commands::Format { path } => file_edit_op("format", config, json_output, &path).await,
        Commands::OrganizeImports { path } => {
            file_edit_op("organize-imports", config, json_output, &path).await
        }

        Commands::ReplaceFunction {
            symbol,
            body_file,
            no_check_signature,
        } => {
            let new_body = match body_file {
                Some(file) => std::fs::read_to_string(&file)
                    .map_err(|e| CliError::Io(format!("{}: {e}", file.display())))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .map_err(|e| CliError::Io(e.to_string()))?;
                    buffer
                }
            };
            let root = workspace_root_for_cwd(config)?;
            let params = proto::ReplaceFunctionParams {
                workspace_root: root.to_string_lossy().to_string(),
                expr: symbol,
                new_body,
                check_signature: !no_check_signature,
            };
            let value = send_request("replace-function", to_value(&params)?).await?;
            let result: proto::ReplaceFunctionResult = from_value(value)?;
            print_payload(json_output, &result, |r| {
                format!(
                    "Replaced {} lines {} (now {})",
                    r.path, r.old_range, r.new_range
                )
            })
        }

        Commands::Daemon { .. } | Commands::Workspace { .. } | Commands::Config => unreachable!(),
    }
}

async fn file_edit_op(
    op: &str,
    config: &Config,
    json_output: bool,
    path: &str,
) -> Result<(), CliError> {
    let target = PathBuf::from(path)
        .canonicalize()
        .map_err(|e| CliError::Io(format!("{path}: {e}")))?;
    let root = workspace_root_for_path(config, &target)?;
    let params = proto::FormatParams {
        workspace_root: root.to_string_lossy().to_string(),
        path: target.to_string_lossy().to_string(),
    };
    let value = send_request(op, to_value(&params)?).await?;
    let result: proto::FormatResult = from_value(value)?;
    print_payload(json_output, &result, |r| {
        format!("{}: {} edits applied", r.path, r.edits_applied)
    })
}

async fn handle_workspace(command: WorkspaceCommands) -> Result<(), CliError> {
    match command {
        WorkspaceCommands::Add { root } => {
            let root = match root {
                Some(root) => PathBuf::from(&root)
                    .canonicalize()
                    .map_err(|e| CliError::Io(format!("{root}: {e}")))?,
                None => {
                    let cwd = std::env::current_dir().map_err(|e| CliError::Io(e.to_string()))?;
                    detect_workspace_root(&cwd).unwrap_or(cwd)
                }
            };
            ensure_daemon_running().await?;
            let params = proto::WorkspaceParams {
                workspace_root: root.to_string_lossy().to_string(),
            };
            let value = send_request("add-workspace", to_value(&params)?).await?;
            let result: proto::AddWorkspaceResult = from_value(value)?;
            if result.added {
                println!("Added workspace: {}", result.workspace_root);
                println!("Symbol index population started in background");
            } else {
                println!("Workspace already added: {}", result.workspace_root);
            }
            Ok(())
        }
        WorkspaceCommands::Remove { root } => {
            let root = resolve_root_arg(root)?;
            ensure_daemon_running().await?;
            let params = proto::WorkspaceParams {
                workspace_root: root.to_string_lossy().to_string(),
            };
            let value = send_request("remove-workspace", to_value(&params)?).await?;
            let result: proto::RemoveWorkspaceResult = from_value(value)?;
            println!("Removed workspace: {}", root.display());
            if !result.servers_stopped.is_empty() {
                println!("Stopped servers: {}", result.servers_stopped.join(", "));
            }
            Ok(())
        }
        WorkspaceCommands::Restart { root } => {
            let root = resolve_root_arg(root)?;
            ensure_daemon_running().await?;
            let params = proto::WorkspaceParams {
                workspace_root: root.to_string_lossy().to_string(),
            };
            let value = send_request("restart-workspace", to_value(&params)?).await?;
            let result: proto::RestartWorkspaceResult = from_value(value)?;
            if result.restarted.is_empty() {
                println!("No servers were running for {}", root.display());
            } else {
                println!("Restarted: {}", result.restarted.join(", "));
            }
            Ok(())
        }
    }
}

fn resolve_root_arg(root: Option<String>) -> Result<PathBuf, CliError> {
    match root {
        Some(root) => PathBuf::from(&root)
            .canonicalize()
            .map_err(|e| CliError::Io(format!("{root}: {e}"))),
        None => {
            let config = load_config()?;
            workspace_root_for_cwd(&config)
        }
    }
}

async fn handle_daemon(command: DaemonCommands) -> Result<(), CliError> {
    match command {
        DaemonCommands::Start => {
            if is_daemon_running() {
                println!("Daemon already running");
            } else {
                ensure_daemon_running().await?;
                println!("Daemon started");
            }
            Ok(())
        }
        DaemonCommands::Stop => {
            if !is_daemon_running() {
                println!("Daemon is not running");
            } else {
                send_request("shutdown", json!({})).await?;
                println!("Daemon stopped");
            }
            Ok(())
        }
        DaemonCommands::Restart => {
            if is_daemon_running() {
                send_request("shutdown", json!({})).await?;
                for _ in 0..50 {
                    if !socket_path().exists() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
            ensure_daemon_running().await?;
            println!("Daemon restarted");
            Ok(())
        }
        DaemonCommands::Info => {
            ensure_daemon_running().await?;
            let value = send_request("describe-session", json!({})).await?;
            let result: proto::DescribeResult = from_value(value)?;
            println!("{}", output::format_describe(&result));
            Ok(())
        }
    }
}

fn handle_config() -> Result<(), CliError> {
    let path = config_path();
    println!("Config file: {}", path.display());
    println!();
    if path.exists() {
        let content = std::fs::read_to_string(&path).map_err(|e| CliError::Io(e.to_string()))?;
        println!("{content}");
    } else {
        println!("(file does not exist, using defaults)");
    }
    Ok(())
}
