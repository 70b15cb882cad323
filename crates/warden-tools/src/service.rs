//! The tool mediator.
//!
//! Every public method runs the same pipeline: service switch, input validation,
//! classification (path oracle or command sandbox), approval, the blocking or async
//! operation itself, and error mapping into [`ToolError`]. Outcomes are traced and,
//! when an [`AuditLogger`] is attached, written to the audit log.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::audit::{AuditEntry, AuditLogger, AuditResult};
use crate::config::{LimitsConfig, ToolsConfig};
use crate::error::{ErrorClass, ToolError};
use crate::fetch::{WebFetcher, validate_url};
use crate::file;
use crate::output::{CommandResult, EditOutcome, FileEntry, SearchResult, WriteOutcome};
use crate::permissions::{
    ApprovalOracle, ApprovalRequest, PathDecision, PathOperation, PathOracle, PermissionLevel,
};
use crate::registry::{
    EDIT_FILE, LIST_DIRECTORY, READ_FILE, RUN_COMMAND, SEARCH_FILES, WEB_FETCH, WRITE_FILE,
};
use crate::sandbox::{CommandDecision, CommandSandbox};
use crate::shell::run_shell;

/// One pending approval decision.
struct Approval<'a> {
    tool: &'static str,
    details: &'a str,
    default_level: PermissionLevel,
    /// Whether an approval may be remembered for the session.
    cacheable: bool,
    description: String,
    diff_preview: Option<String>,
}

impl<'a> Approval<'a> {
    fn new(
        tool: &'static str,
        details: &'a str,
        default_level: PermissionLevel,
        cacheable: bool,
        description: String,
    ) -> Self {
        Self {
            tool,
            details,
            default_level,
            cacheable,
            description,
            diff_preview: None,
        }
    }

    /// Approval for a path the oracle flagged; asked every time, never remembered.
    fn flagged_path(tool: &'static str, details: &'a str, description: String) -> Self {
        Self::new(tool, details, PermissionLevel::AskAlways, false, description)
    }

    fn with_diff(mut self, diff_preview: Option<String>) -> Self {
        self.diff_preview = diff_preview;
        self
    }
}

/// Executes tool calls on behalf of the model, consulting `P` for path legality and `A`
/// for human approval.
pub struct ToolService<P, A> {
    enabled: bool,
    sandbox: CommandSandbox,
    fetcher: WebFetcher,
    limits: LimitsConfig,
    shell_timeout: Duration,
    allowed_command_level: PermissionLevel,
    fetch_level: PermissionLevel,
    paths: P,
    approvals: A,
    audit: Option<AuditLogger>,
}

impl<P: PathOracle, A: ApprovalOracle> ToolService<P, A> {
    #[must_use]
    pub fn new(config: &ToolsConfig, paths: P, approvals: A) -> Self {
        Self {
            enabled: config.enabled,
            sandbox: CommandSandbox::new(&config.shell),
            fetcher: WebFetcher::new(&config.fetch, config.limits.max_fetch_bytes),
            limits: config.limits.clone(),
            shell_timeout: Duration::from_secs(config.shell.timeout),
            allowed_command_level: config.shell.allowed_command_level,
            fetch_level: config.fetch.permission_level,
            paths,
            approvals,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(logger);
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn sandbox(&self) -> &CommandSandbox {
        &self.sandbox
    }

    #[must_use]
    pub fn max_search_results(&self) -> usize {
        self.limits.max_search_results
    }

    /// Read a UTF-8 text file.
    ///
    /// # Errors
    ///
    /// `FileNotFound`, `FileNotReadable`, `BinaryFileUnsupported`, `ResourceLimitExceeded`,
    /// `InvalidPath`, `PermissionDenied`, or `ServiceDisabled`.
    pub async fn read_file(&self, path: &str, conversation_id: &str) -> Result<String, ToolError> {
        self.mediate(
            READ_FILE,
            path,
            conversation_id,
            self.read_file_inner(path, conversation_id),
        )
        .await
    }

    async fn read_file_inner(&self, raw: &str, conversation_id: &str) -> Result<String, ToolError> {
        let path = self.resolve(raw)?;
        self.approve_read(READ_FILE, &path, conversation_id).await?;

        let max_bytes = self.limits.max_read_bytes;
        blocking(move || file::read_text(&path, max_bytes), |reason| {
            ToolError::FileNotReadable {
                path: raw.to_owned(),
                reason,
            }
        })
        .await
    }

    /// Create or replace a file after approval.
    ///
    /// # Errors
    ///
    /// `FileNotWritable`, `InvalidPath`, `PermissionDenied`, or `ServiceDisabled`.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        conversation_id: &str,
    ) -> Result<WriteOutcome, ToolError> {
        self.mediate(
            WRITE_FILE,
            path,
            conversation_id,
            self.write_file_inner(path, content, conversation_id),
        )
        .await
    }

    async fn write_file_inner(
        &self,
        raw: &str,
        content: &str,
        conversation_id: &str,
    ) -> Result<WriteOutcome, ToolError> {
        let path = self.resolve(raw)?;
        let flagged = self.classify_path(WRITE_FILE, &path, PathOperation::Write)?;
        let details = path.display().to_string();

        let previous = {
            let path = path.clone();
            let max_bytes = self.limits.max_read_bytes;
            blocking(move || Ok(file::read_text(&path, max_bytes).ok()), |_| {
                ToolError::FileNotReadable {
                    path: raw.to_owned(),
                    reason: "could not read current content".into(),
                }
            })
            .await?
        };
        let diff = previous.map(|old| file::diff_preview(&details, &old, content));
        let description = format!("Write {} bytes to {details}", content.len());
        let approval = match flagged {
            Some(reason) => {
                Approval::flagged_path(WRITE_FILE, &details, format!("{description} ({reason})"))
            }
            None => Approval::new(
                WRITE_FILE,
                &details,
                PermissionLevel::AskOnce,
                true,
                description,
            ),
        };
        self.authorize(approval.with_diff(diff), conversation_id)
            .await?;

        let bytes = content.as_bytes().to_vec();
        let target = path.clone();
        let bytes_written = blocking(move || file::write_atomic(&target, &bytes), |reason| {
            ToolError::FileNotWritable {
                path: raw.to_owned(),
                reason,
            }
        })
        .await?;

        Ok(WriteOutcome {
            path,
            bytes_written,
        })
    }

    /// Replace the single exact occurrence of `old_text` with `new_text`.
    ///
    /// Identical texts are a no-op: nothing is read, written, or prompted.
    ///
    /// # Errors
    ///
    /// `EmptySearchText`, `EditNotFound`, `EditAmbiguous`, `BinaryFileUnsupported`, the read
    /// and write errors of [`Self::read_file`] and [`Self::write_file`], `PermissionDenied`,
    /// or `ServiceDisabled`.
    pub async fn edit_file(
        &self,
        path: &str,
        old_text: &str,
        new_text: &str,
        conversation_id: &str,
    ) -> Result<EditOutcome, ToolError> {
        self.mediate(
            EDIT_FILE,
            path,
            conversation_id,
            self.edit_file_inner(path, old_text, new_text, conversation_id),
        )
        .await
    }

    async fn edit_file_inner(
        &self,
        raw: &str,
        old_text: &str,
        new_text: &str,
        conversation_id: &str,
    ) -> Result<EditOutcome, ToolError> {
        if old_text.is_empty() {
            return Err(ToolError::EmptySearchText);
        }
        let path = self.resolve(raw)?;
        let flagged = self.classify_path(EDIT_FILE, &path, PathOperation::Write)?;
        if old_text == new_text {
            tracing::debug!(path = %path.display(), "edit is a no-op");
            return Ok(EditOutcome::Unchanged { path });
        }

        let content = {
            let path = path.clone();
            let max_bytes = self.limits.max_read_bytes;
            blocking(move || file::read_text(&path, max_bytes), |reason| {
                ToolError::FileNotReadable {
                    path: raw.to_owned(),
                    reason,
                }
            })
            .await?
        };
        let updated = file::apply_edit(&path, &content, old_text, new_text)?;

        let details = path.display().to_string();
        let diff = file::diff_preview(&details, &content, &updated);
        let description = format!("Edit {details}");
        let approval = match flagged {
            Some(reason) => {
                Approval::flagged_path(EDIT_FILE, &details, format!("{description} ({reason})"))
            }
            None => Approval::new(
                EDIT_FILE,
                &details,
                PermissionLevel::AskOnce,
                true,
                description,
            ),
        };
        self.authorize(approval.with_diff(Some(diff)), conversation_id)
            .await?;

        let target = path.clone();
        let bytes_written = blocking(
            move || file::write_atomic(&target, updated.as_bytes()),
            |reason| ToolError::FileNotWritable {
                path: raw.to_owned(),
                reason,
            },
        )
        .await?;

        Ok(EditOutcome::Edited {
            path,
            bytes_written,
        })
    }

    /// Visible entries of a directory, sorted case-insensitively.
    ///
    /// # Errors
    ///
    /// `FileNotFound`, `InvalidPath` for a non-directory, `FileNotReadable`,
    /// `PermissionDenied`, or `ServiceDisabled`.
    pub async fn list_directory(
        &self,
        path: &str,
        conversation_id: &str,
    ) -> Result<Vec<FileEntry>, ToolError> {
        self.mediate(
            LIST_DIRECTORY,
            path,
            conversation_id,
            self.list_directory_inner(path, conversation_id),
        )
        .await
    }

    async fn list_directory_inner(
        &self,
        raw: &str,
        conversation_id: &str,
    ) -> Result<Vec<FileEntry>, ToolError> {
        let path = self.resolve(raw)?;
        self.approve_read(LIST_DIRECTORY, &path, conversation_id)
            .await?;

        blocking(move || file::list_dir(&path), |reason| {
            ToolError::FileNotReadable {
                path: raw.to_owned(),
                reason,
            }
        })
        .await
    }

    /// Regex search under `path`, first match per line, capped at `limits.max_search_results`.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for a bad regex or path, `FileNotFound`, `PermissionDenied`, or
    /// `ServiceDisabled`.
    pub async fn search_files(
        &self,
        pattern: &str,
        path: &str,
        conversation_id: &str,
    ) -> Result<Vec<SearchResult>, ToolError> {
        self.mediate(
            SEARCH_FILES,
            path,
            conversation_id,
            self.search_files_inner(pattern, path, conversation_id),
        )
        .await
    }

    async fn search_files_inner(
        &self,
        pattern: &str,
        raw: &str,
        conversation_id: &str,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let regex = Regex::new(pattern).map_err(|e| ToolError::InvalidPath {
            path: pattern.to_owned(),
            reason: format!("invalid regex: {e}"),
        })?;
        let path = self.resolve(raw)?;
        self.approve_read(SEARCH_FILES, &path, conversation_id)
            .await?;

        let limit = self.limits.max_search_results;
        let max_file_bytes = self.limits.max_read_bytes;
        blocking(
            move || file::search(&path, &regex, limit, max_file_bytes),
            |reason| ToolError::FileNotReadable {
                path: raw.to_owned(),
                reason,
            },
        )
        .await
    }

    /// Classify, approve, and run a shell command.
    ///
    /// # Errors
    ///
    /// `SandboxBlocked` (no process is spawned), `InvalidPath` for a rejected working
    /// directory, `PermissionDenied`, `CommandFailed`, `CommandTimeout`, or `ServiceDisabled`.
    pub async fn run_command(
        &self,
        command: &str,
        working_directory: Option<&str>,
        conversation_id: &str,
    ) -> Result<CommandResult, ToolError> {
        self.mediate(
            RUN_COMMAND,
            command,
            conversation_id,
            self.run_command_inner(command, working_directory, conversation_id),
        )
        .await
    }

    async fn run_command_inner(
        &self,
        command: &str,
        working_directory: Option<&str>,
        conversation_id: &str,
    ) -> Result<CommandResult, ToolError> {
        let decision = self.sandbox.validate(command);
        tracing::debug!(command, ?decision, "command classified");

        let (default_level, cacheable) = match decision {
            CommandDecision::Blocked { reason } => {
                return Err(ToolError::SandboxBlocked {
                    command: command.to_owned(),
                    reason,
                });
            }
            CommandDecision::RequiresApproval => (PermissionLevel::AskAlways, false),
            CommandDecision::Allowed => (self.allowed_command_level, true),
        };

        let cwd = self.working_directory(working_directory).await?;

        let description = match &cwd {
            Some(dir) => format!("Run `{command}` in {}", dir.display()),
            None => format!("Run `{command}`"),
        };
        self.authorize(
            Approval::new(RUN_COMMAND, command, default_level, cacheable, description),
            conversation_id,
        )
        .await?;

        run_shell(command, cwd.as_deref(), self.shell_timeout).await
    }

    /// Directory a command runs in: the requested one when permitted, else the project root.
    async fn working_directory(&self, requested: Option<&str>) -> Result<Option<PathBuf>, ToolError> {
        let Some(raw) = requested.filter(|d| !d.trim().is_empty()) else {
            return Ok(self.sandbox.project_root().map(Path::to_path_buf));
        };

        let requested = Path::new(raw);
        let dir = match self.sandbox.project_root() {
            Some(root) if requested.is_relative() => root.join(requested),
            _ => requested.to_path_buf(),
        };
        let invalid = |reason: &str| ToolError::InvalidPath {
            path: raw.to_owned(),
            reason: reason.to_owned(),
        };

        if !self.sandbox.is_working_directory_allowed(&dir) {
            return Err(invalid("working directory is outside the project root"));
        }
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Some(dir)),
            Ok(_) => Err(invalid("working directory is not a directory")),
            Err(_) => Err(invalid("working directory does not exist")),
        }
    }

    /// Fetch a public http(s) URL as text.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for a rejected URL, `FileNotReadable`, `ResourceLimitExceeded`,
    /// `BinaryFileUnsupported`, `PermissionDenied`, or `ServiceDisabled`.
    pub async fn web_fetch(&self, url: &str, conversation_id: &str) -> Result<String, ToolError> {
        self.mediate(
            WEB_FETCH,
            url,
            conversation_id,
            self.web_fetch_inner(url, conversation_id),
        )
        .await
    }

    async fn web_fetch_inner(&self, raw: &str, conversation_id: &str) -> Result<String, ToolError> {
        let url = validate_url(raw)?;
        self.authorize(
            Approval::new(
                WEB_FETCH,
                url.as_str(),
                self.fetch_level,
                true,
                format!("Fetch {url}"),
            ),
            conversation_id,
        )
        .await?;
        self.fetcher.fetch(url.as_str()).await
    }

    /// Service switch, outcome tracing, and audit around one tool call.
    async fn mediate<T>(
        &self,
        tool: &'static str,
        details: &str,
        conversation_id: &str,
        operation: impl Future<Output = Result<T, ToolError>>,
    ) -> Result<T, ToolError> {
        let start = Instant::now();
        let result = if self.enabled {
            operation.await
        } else {
            Err(ToolError::ServiceDisabled)
        };
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => tracing::info!(tool, conversation = conversation_id, duration_ms, "tool executed"),
            Err(e) if e.class() == ErrorClass::Policy => {
                tracing::warn!(tool, conversation = conversation_id, error = %e, "tool call refused");
            }
            Err(e) => tracing::debug!(tool, conversation = conversation_id, error = %e, "tool call failed"),
        }

        if let Some(audit) = &self.audit {
            let entry = AuditEntry::now(tool, conversation_id, details, AuditResult::from_outcome(&result))
                .with_duration_ms(duration_ms);
            audit.log(&entry).await;
        }

        result
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        if raw.trim().is_empty() {
            return Err(ToolError::InvalidPath {
                path: raw.to_owned(),
                reason: "path must not be empty".into(),
            });
        }
        self.paths
            .canonicalize(Path::new(raw))
            .ok_or_else(|| ToolError::InvalidPath {
                path: raw.to_owned(),
                reason: "path cannot be resolved".into(),
            })
    }

    /// `Ok(None)` when the path oracle allows the access, `Ok(Some(reason))` when it wants a
    /// human to confirm.
    fn classify_path(
        &self,
        tool: &str,
        path: &Path,
        operation: PathOperation,
    ) -> Result<Option<String>, ToolError> {
        match self.paths.validate(path, operation) {
            PathDecision::Allowed => Ok(None),
            PathDecision::RequiresApproval { reason } => Ok(Some(reason)),
            PathDecision::Denied { reason } => Err(ToolError::PermissionDenied {
                tool: tool.to_owned(),
                details: format!("{}: {reason}", path.display()),
            }),
        }
    }

    /// Reads of allowed paths run without a prompt; flagged paths are confirmed every time.
    async fn approve_read(
        &self,
        tool: &'static str,
        path: &Path,
        conversation_id: &str,
    ) -> Result<(), ToolError> {
        let Some(reason) = self.classify_path(tool, path, PathOperation::Read)? else {
            return Ok(());
        };
        let details = path.display().to_string();
        let description = format!("Read {details} ({reason})");
        self.authorize(
            Approval::flagged_path(tool, &details, description),
            conversation_id,
        )
        .await
    }

    async fn authorize(&self, approval: Approval<'_>, conversation_id: &str) -> Result<(), ToolError> {
        let level = self.approvals.check_permission(
            approval.tool,
            approval.details,
            approval.default_level,
        );
        if level == PermissionLevel::Automatic {
            return Ok(());
        }

        let request = ApprovalRequest {
            tool_name: approval.tool.to_owned(),
            description: approval.description,
            details: approval.details.to_owned(),
            diff_preview: approval.diff_preview,
            conversation_id: conversation_id.to_owned(),
        };
        if !self.approvals.request_approval(request).await {
            return Err(ToolError::PermissionDenied {
                tool: approval.tool.to_owned(),
                details: approval.details.to_owned(),
            });
        }

        if approval.cacheable && level == PermissionLevel::AskOnce {
            self.approvals
                .record_session_approval(approval.tool, approval.details);
        }
        Ok(())
    }
}

/// Run blocking filesystem work off the async worker threads.
///
/// A panic inside `f` is resumed on the calling task; a cancelled task maps through
/// `on_cancel`.
async fn blocking<T, F>(
    f: F,
    on_cancel: impl FnOnce(String) -> ToolError,
) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(on_cancel(e.to_string())),
    }
}
