//! Maps a model's tool call onto the mediator and renders the outcome as text.

use std::fmt::Write;
use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::output::{EditOutcome, FileEntry, SearchResult, format_size, truncate_tool_output};
use crate::params::{ArgError, ToolArgs};
use crate::permissions::{ApprovalOracle, PathOracle};
use crate::registry::{
    EDIT_FILE, LIST_DIRECTORY, READ_FILE, RUN_COMMAND, SEARCH_FILES, ToolRegistry, WEB_FETCH,
    WRITE_FILE,
};
use crate::service::ToolService;

pub const CANCELLED_MESSAGE: &str = "Tool call cancelled.";

/// A tool call with its arguments extracted and owned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ToolCall {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        old_text: String,
        new_text: String,
    },
    ListDirectory {
        path: String,
    },
    SearchFiles {
        pattern: String,
        path: String,
    },
    RunCommand {
        command: String,
        working_directory: Option<String>,
    },
    WebFetch {
        url: String,
    },
}

impl ToolCall {
    /// `Ok(None)` for a name no tool answers to.
    fn parse(name: &str, args: &ToolArgs) -> Result<Option<Self>, ArgError> {
        let s = |key: &str| args.required_str(key).map(str::to_owned);
        let call = match name {
            READ_FILE => Self::ReadFile { path: s("path")? },
            WRITE_FILE => Self::WriteFile {
                path: s("path")?,
                content: s("content")?,
            },
            EDIT_FILE => Self::EditFile {
                path: s("path")?,
                old_text: s("old_text")?,
                new_text: s("new_text")?,
            },
            LIST_DIRECTORY => Self::ListDirectory { path: s("path")? },
            SEARCH_FILES => Self::SearchFiles {
                pattern: s("pattern")?,
                path: s("path")?,
            },
            RUN_COMMAND => Self::RunCommand {
                command: s("command")?,
                working_directory: args.optional_str("working_directory")?.map(str::to_owned),
            },
            WEB_FETCH => Self::WebFetch { url: s("url")? },
            _ => return Ok(None),
        };
        Ok(Some(call))
    }
}

/// Entry point for model tool calls. Never fails: every outcome becomes a string.
pub struct ToolRouter<P, A> {
    service: Arc<ToolService<P, A>>,
    registry: ToolRegistry,
}

impl<P, A> ToolRouter<P, A>
where
    P: PathOracle + 'static,
    A: ApprovalOracle + 'static,
{
    #[must_use]
    pub fn new(service: ToolService<P, A>) -> Self {
        Self::from_shared(Arc::new(service))
    }

    #[must_use]
    pub fn from_shared(service: Arc<ToolService<P, A>>) -> Self {
        Self {
            service,
            registry: ToolRegistry::builtin(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &ToolService<P, A> {
        &self.service
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, name: &str, args: &ToolArgs, conversation_id: &str) -> String {
        self.execute_cancellable(name, args, conversation_id, &CancellationToken::new())
            .await
    }

    /// Like [`Self::execute`], but gives up with [`CANCELLED_MESSAGE`] once `cancel` fires.
    ///
    /// The in-flight call is aborted: a running child process is killed and an HTTP
    /// request is dropped.
    pub async fn execute_cancellable(
        &self,
        name: &str,
        args: &ToolArgs,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> String {
        let call = match ToolCall::parse(name, args) {
            Ok(Some(call)) => call,
            Ok(None) => {
                tracing::warn!(tool = name, "unknown tool requested");
                return format!(
                    "Unknown tool: '{name}'. Available tools: {}",
                    self.registry.names().join(", ")
                );
            }
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "rejected tool arguments");
                return format!(
                    "Invalid arguments for {name}: {e}. Check the tool's parameters and try again."
                );
            }
        };

        let service = Arc::clone(&self.service);
        let conversation_id = conversation_id.to_owned();
        let mut handle =
            tokio::spawn(async move { dispatch(&service, call, &conversation_id).await });

        let rendered = tokio::select! {
            () = cancel.cancelled() => {
                handle.abort();
                tracing::info!(tool = name, "tool call cancelled");
                return CANCELLED_MESSAGE.to_owned();
            }
            joined = &mut handle => match joined {
                Ok(rendered) => rendered,
                Err(e) => join_failure(name, e),
            },
        };

        truncate_tool_output(&rendered)
    }
}

async fn dispatch<P: PathOracle, A: ApprovalOracle>(
    service: &ToolService<P, A>,
    call: ToolCall,
    conversation_id: &str,
) -> String {
    let result = match call {
        ToolCall::ReadFile { path } => service.read_file(&path, conversation_id).await,
        ToolCall::WriteFile { path, content } => service
            .write_file(&path, &content, conversation_id)
            .await
            .map(|out| format!("Wrote {} bytes to {}", out.bytes_written, out.path.display())),
        ToolCall::EditFile {
            path,
            old_text,
            new_text,
        } => service
            .edit_file(&path, &old_text, &new_text, conversation_id)
            .await
            .map(|outcome| render_edit(&outcome)),
        ToolCall::ListDirectory { path } => service
            .list_directory(&path, conversation_id)
            .await
            .map(|entries| render_entries(&entries)),
        ToolCall::SearchFiles { pattern, path } => service
            .search_files(&pattern, &path, conversation_id)
            .await
            .map(|results| render_search(&results, service.max_search_results())),
        ToolCall::RunCommand {
            command,
            working_directory,
        } => service
            .run_command(&command, working_directory.as_deref(), conversation_id)
            .await
            .map(|result| result.to_string()),
        ToolCall::WebFetch { url } => service.web_fetch(&url, conversation_id).await,
    };

    result.unwrap_or_else(|e| format!("Error: {}", e.model_message()))
}

fn render_edit(outcome: &EditOutcome) -> String {
    match outcome {
        EditOutcome::Edited {
            path,
            bytes_written,
        } => format!("Edited {} ({bytes_written} bytes)", path.display()),
        EditOutcome::Unchanged { .. } => "No changes needed".to_owned(),
    }
}

fn render_entries(entries: &[FileEntry]) -> String {
    if entries.is_empty() {
        return "(empty directory)".to_owned();
    }
    let mut out = String::new();
    for entry in entries {
        if entry.is_dir {
            let _ = writeln!(out, "[dir] {}/", entry.name);
        } else if let Some(size) = entry.size {
            let _ = writeln!(out, "[file] {} ({})", entry.name, format_size(size));
        } else {
            let _ = writeln!(out, "[file] {}", entry.name);
        }
    }
    out.truncate(out.trim_end().len());
    out
}

fn render_search(results: &[SearchResult], limit: usize) -> String {
    if results.is_empty() {
        return "No matches found".to_owned();
    }
    let mut out = String::new();
    for r in results {
        let _ = writeln!(out, "{}:{}: {}", r.path.display(), r.line_number, r.line);
    }
    if results.len() >= limit {
        let _ = writeln!(
            out,
            "[results truncated at {limit} matches; narrow the pattern or path]"
        );
    }
    out.truncate(out.trim_end().len());
    out
}

/// A task that panicked or was torn down; its message goes back verbatim.
fn join_failure(tool: &str, err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "tool execution panicked".to_owned());
    tracing::error!(tool, %message, "tool call panicked");
    message
}
