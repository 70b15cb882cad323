use std::io;
use std::path::Path;

/// Maximum number of stderr characters carried by [`ToolError::CommandFailed`].
pub const STDERR_PREVIEW_CHARS: usize = 2_000;

/// Policy class of a [`ToolError`], used to decide how the failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The action was declined or disallowed. Never retried.
    Policy,
    /// The underlying I/O or process failed.
    Execution,
    /// The request itself was malformed and can be corrected by the caller.
    Validation,
    /// A hard limit or service switch stopped the action.
    Resource,
}

/// Errors that can occur during tool execution.
///
/// This set is closed: every mediator operation either succeeds or returns exactly one of
/// these variants. `Display` is the log-facing rendering, [`ToolError::model_message`] the
/// recovery-oriented one handed back to the model.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("permission denied for {tool}: {details}")]
    PermissionDenied { tool: String, details: String },

    #[error("command blocked by sandbox ({reason}): {command}")]
    SandboxBlocked { command: String, reason: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("cannot read {path}: {reason}")]
    FileNotReadable { path: String, reason: String },

    #[error("cannot write {path}: {reason}")]
    FileNotWritable { path: String, reason: String },

    #[error("command exited with status {exit_code}: {command}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("search text matches {match_count} locations in {path}")]
    EditAmbiguous { path: String, match_count: usize },

    #[error("search text not found in {path}")]
    EditNotFound { path: String },

    #[error("binary content not supported: {path}")]
    BinaryFileUnsupported { path: String },

    #[error("search text must not be empty")]
    EmptySearchText,

    #[error("{resource} exceeds limit: {actual} bytes (max {limit})")]
    ResourceLimitExceeded {
        resource: String,
        actual: u64,
        limit: u64,
    },

    #[error("tool execution is disabled")]
    ServiceDisabled,
}

impl ToolError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PermissionDenied { .. } | Self::SandboxBlocked { .. } => ErrorClass::Policy,
            Self::FileNotFound { .. }
            | Self::FileNotReadable { .. }
            | Self::FileNotWritable { .. }
            | Self::CommandFailed { .. }
            | Self::CommandTimeout { .. } => ErrorClass::Execution,
            Self::InvalidPath { .. }
            | Self::EditAmbiguous { .. }
            | Self::EditNotFound { .. }
            | Self::BinaryFileUnsupported { .. }
            | Self::EmptySearchText => ErrorClass::Validation,
            Self::ResourceLimitExceeded { .. } | Self::ServiceDisabled => ErrorClass::Resource,
        }
    }

    /// Message for the model: what happened and how to adjust the next call.
    #[must_use]
    pub fn model_message(&self) -> String {
        match self {
            Self::PermissionDenied { tool, details } => format!(
                "Permission for {tool} was denied ({details}). Do not retry the same action; \
                 ask the user how to proceed or choose a different approach."
            ),
            Self::SandboxBlocked { command, reason } => format!(
                "The command `{command}` was blocked by the sandbox ({reason}). \
                 It will not run in any form; use a safer command without shell substitution \
                 or the blocked operation."
            ),
            Self::FileNotFound { path } => format!(
                "File not found: {path}. Check the path with list_directory or search_files."
            ),
            Self::FileNotReadable { path, reason } => {
                format!("Could not read {path}: {reason}.")
            }
            Self::FileNotWritable { path, reason } => format!(
                "Could not write {path}: {reason}. Check that the location is writable."
            ),
            Self::CommandFailed {
                command,
                exit_code,
                stderr,
            } => {
                if stderr.trim().is_empty() {
                    format!("Command `{command}` failed with exit code {exit_code}.")
                } else {
                    format!(
                        "Command `{command}` failed with exit code {exit_code}.\nstderr:\n{stderr}"
                    )
                }
            }
            Self::CommandTimeout {
                command,
                timeout_secs,
            } => format!(
                "Command `{command}` did not finish within {timeout_secs}s and was terminated. \
                 Try a faster or more targeted command."
            ),
            Self::InvalidPath { path, reason } => format!("Invalid path or URL {path}: {reason}."),
            Self::EditAmbiguous { path, match_count } => format!(
                "The search text matches {match_count} locations in {path}. \
                 Include more surrounding context in old_text to make the match unique."
            ),
            Self::EditNotFound { path } => format!(
                "The search text was not found in {path}. old_text must match the file exactly, \
                 including whitespace and indentation; read the file again before retrying."
            ),
            Self::BinaryFileUnsupported { path } => format!(
                "{path} contains binary content and cannot be handled as text."
            ),
            Self::EmptySearchText => {
                "old_text must not be empty. Provide the exact text to replace.".to_owned()
            }
            Self::ResourceLimitExceeded {
                resource,
                actual,
                limit,
            } => format!(
                "{resource} is too large ({actual} bytes, limit {limit} bytes). \
                 Work with a smaller file or a narrower request."
            ),
            Self::ServiceDisabled => {
                "Tool execution is disabled in this session. Answer without using tools."
                    .to_owned()
            }
        }
    }
}

/// Map an I/O error raised while reading `path` into the taxonomy.
pub(crate) fn read_error(path: &Path, err: &io::Error) -> ToolError {
    let path = path.display().to_string();
    match err.kind() {
        io::ErrorKind::NotFound => ToolError::FileNotFound { path },
        io::ErrorKind::InvalidData => ToolError::BinaryFileUnsupported { path },
        _ => ToolError::FileNotReadable {
            path,
            reason: err.to_string(),
        },
    }
}

/// Map an I/O error raised while writing `path` into the taxonomy.
pub(crate) fn write_error(path: &Path, err: &io::Error) -> ToolError {
    ToolError::FileNotWritable {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Keep at most `max` characters of `text`, appending a marker when cut.
#[must_use]
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}… [truncated]", &text[..idx]),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_blocked_display() {
        let err = ToolError::SandboxBlocked {
            command: "rm -rf /".to_owned(),
            reason: "blocked pattern: rm -rf /".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "command blocked by sandbox (blocked pattern: rm -rf /): rm -rf /"
        );
    }

    #[test]
    fn timeout_display() {
        let err = ToolError::CommandTimeout {
            command: "sleep 5".to_owned(),
            timeout_secs: 1,
        };
        assert_eq!(err.to_string(), "command timed out after 1s: sleep 5");
    }

    #[test]
    fn edit_ambiguous_model_message_asks_for_context() {
        let err = ToolError::EditAmbiguous {
            path: "src/lib.rs".to_owned(),
            match_count: 2,
        };
        let msg = err.model_message();
        assert!(msg.contains("2 locations"));
        assert!(msg.contains("more surrounding context"));
    }

    #[test]
    fn resource_limit_includes_limit_value() {
        let err = ToolError::ResourceLimitExceeded {
            resource: "big.log".to_owned(),
            actual: 20,
            limit: 10,
        };
        assert!(err.to_string().contains("max 10"));
        assert!(err.model_message().contains("limit 10 bytes"));
    }

    #[test]
    fn command_failed_model_message_omits_empty_stderr() {
        let err = ToolError::CommandFailed {
            command: "false".to_owned(),
            exit_code: 1,
            stderr: "  \n".to_owned(),
        };
        assert!(!err.model_message().contains("stderr"));
    }

    #[test]
    fn classes_cover_policy_classes() {
        assert_eq!(ToolError::ServiceDisabled.class(), ErrorClass::Resource);
        assert_eq!(ToolError::EmptySearchText.class(), ErrorClass::Validation);
        assert_eq!(
            ToolError::PermissionDenied {
                tool: "write_file".into(),
                details: "a.txt".into()
            }
            .class(),
            ErrorClass::Policy
        );
        assert_eq!(
            ToolError::CommandTimeout {
                command: "x".into(),
                timeout_secs: 1
            }
            .class(),
            ErrorClass::Execution
        );
    }

    #[test]
    fn read_error_maps_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            read_error(Path::new("a.txt"), &err),
            ToolError::FileNotFound { .. }
        ));
    }

    #[test]
    fn read_error_maps_invalid_data_to_binary() {
        let err = io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8");
        assert!(matches!(
            read_error(Path::new("a.bin"), &err),
            ToolError::BinaryFileUnsupported { .. }
        ));
    }

    #[test]
    fn preview_keeps_short_text() {
        assert_eq!(preview("abc", 10), "abc");
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        let cut = preview("ééééé", 2);
        assert!(cut.starts_with("éé"));
        assert!(cut.ends_with("[truncated]"));
    }
}
