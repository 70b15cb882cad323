//! Success payloads of the mediator and the model-facing truncation helper.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// One visible entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    /// Size in bytes; `None` for directories.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// First regex match on one line of a searched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub path: PathBuf,
    /// 1-based.
    pub line_number: usize,
    pub line: String,
    /// Byte offset into `line`.
    pub match_start: usize,
    /// Byte offset into `line`, exclusive.
    pub match_end: usize,
}

/// Snapshot of one finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        if !stdout.is_empty() {
            writeln!(f, "{stdout}")?;
        }
        if !stderr.is_empty() {
            writeln!(f, "[stderr]\n{stderr}")?;
        }
        write!(
            f,
            "(exit {}, {}ms)",
            self.exit_code,
            self.duration.as_millis()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub bytes_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Edited { path: PathBuf, bytes_written: usize },
    /// `old_text` and `new_text` were identical; the file was left untouched.
    Unchanged { path: PathBuf },
}

/// Human-readable byte count (`512 B`, `1.5 KB`, `3.2 MB`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.1} GB", b / (KB * KB * KB))
    }
}

/// Truncate tool output that exceeds `MAX_TOOL_OUTPUT_CHARS` using head+tail split.
#[must_use]
pub fn truncate_tool_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let half = MAX_TOOL_OUTPUT_CHARS / 2;
    let head_end = byte_index_of_char(output, half);
    let tail_start = byte_index_of_char(output, total - half);
    let head = &output[..head_end];
    let tail = &output[tail_start..];
    let truncated = total - 2 * half;

    format!(
        "{head}\n\n... [truncated {truncated} chars, showing first and last ~{half} chars] ...\n\n{tail}"
    )
}

fn byte_index_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(idx, _)| idx)
}
