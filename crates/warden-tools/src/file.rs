//! Blocking filesystem primitives behind the file tools.
//!
//! Everything here is synchronous; the service runs it inside `spawn_blocking`.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use regex::Regex;
use similar::{ChangeTag, TextDiff};
use tempfile::NamedTempFile;

use crate::error::{ToolError, read_error, write_error};
use crate::output::{FileEntry, SearchResult};

/// Prefix scanned for null bytes when deciding whether content is binary.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Null-byte heuristic over the first [`BINARY_SNIFF_BYTES`].
#[must_use]
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

/// Read a UTF-8 text file no larger than `max_bytes`.
pub(crate) fn read_text(path: &Path, max_bytes: u64) -> Result<String, ToolError> {
    let meta = fs::metadata(path).map_err(|e| read_error(path, &e))?;
    if meta.is_dir() {
        return Err(ToolError::InvalidPath {
            path: path.display().to_string(),
            reason: "is a directory; use list_directory".into(),
        });
    }
    if meta.len() > max_bytes {
        return Err(ToolError::ResourceLimitExceeded {
            resource: path.display().to_string(),
            actual: meta.len(),
            limit: max_bytes,
        });
    }

    let bytes = fs::read(path).map_err(|e| read_error(path, &e))?;
    if looks_binary(&bytes) {
        return Err(ToolError::BinaryFileUnsupported {
            path: path.display().to_string(),
        });
    }
    String::from_utf8(bytes).map_err(|_| ToolError::BinaryFileUnsupported {
        path: path.display().to_string(),
    })
}

/// Replace `path` with `content` via a temp file in the same directory and a rename.
///
/// Missing parent directories are created. Readers see either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<usize, ToolError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| write_error(path, &e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| write_error(path, &e))?;
    tmp.write_all(content).map_err(|e| write_error(path, &e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_error(path, &e))?;
    if let Ok(existing) = fs::metadata(path) {
        let _ = fs::set_permissions(tmp.path(), existing.permissions());
    }
    tmp.persist(path).map_err(|e| write_error(path, &e.error))?;

    Ok(content.len())
}

/// Replace the single occurrence of `old_text` in `content`.
pub(crate) fn apply_edit(
    path: &Path,
    content: &str,
    old_text: &str,
    new_text: &str,
) -> Result<String, ToolError> {
    if old_text.is_empty() {
        return Err(ToolError::EmptySearchText);
    }
    match content.matches(old_text).count() {
        0 => Err(ToolError::EditNotFound {
            path: path.display().to_string(),
        }),
        1 => Ok(content.replacen(old_text, new_text, 1)),
        match_count => Err(ToolError::EditAmbiguous {
            path: path.display().to_string(),
            match_count,
        }),
    }
}

/// Line diff with three lines of context around each change, headed by `+added -removed`.
#[must_use]
pub fn diff_preview(label: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let (mut added, mut removed) = (0usize, 0usize);
    let mut body = String::new();

    for (i, group) in diff.grouped_ops(3).iter().enumerate() {
        if i > 0 {
            body.push_str("...\n");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let gutter = match change.tag() {
                    ChangeTag::Delete => {
                        removed += 1;
                        '-'
                    }
                    ChangeTag::Insert => {
                        added += 1;
                        '+'
                    }
                    ChangeTag::Equal => ' ',
                };
                let _ = writeln!(
                    body,
                    "{gutter} {}",
                    change.value().trim_end_matches('\n')
                );
            }
        }
    }

    format!("{label}: +{added} -{removed}\n{body}")
}

/// Visible entries of a directory, sorted case-insensitively by name.
pub(crate) fn list_dir(path: &Path) -> Result<Vec<FileEntry>, ToolError> {
    let meta = fs::metadata(path).map_err(|e| read_error(path, &e))?;
    if !meta.is_dir() {
        return Err(ToolError::InvalidPath {
            path: path.display().to_string(),
            reason: "not a directory".into(),
        });
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| read_error(path, &e))? {
        let entry = entry.map_err(|e| read_error(path, &e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let entry_path = entry.path();
        let meta = fs::metadata(&entry_path).or_else(|_| entry.metadata()).ok();
        let is_dir = meta.as_ref().is_some_and(fs::Metadata::is_dir);
        entries.push(FileEntry {
            name,
            size: meta.as_ref().filter(|_| !is_dir).map(fs::Metadata::len),
            modified: meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
            path: entry_path,
            is_dir,
        });
    }

    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

/// First match per line across non-hidden text files under `root`, at most `limit` results.
///
/// Files larger than `max_file_bytes`, binary files, and unreadable files are skipped.
pub(crate) fn search(
    root: &Path,
    regex: &Regex,
    limit: usize,
    max_file_bytes: u64,
) -> Result<Vec<SearchResult>, ToolError> {
    fs::metadata(root).map_err(|e| read_error(root, &e))?;

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .parents(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .sort_by_file_name(|a, b| a.cmp(b));

    let mut results = Vec::new();
    if limit == 0 {
        return Ok(results);
    }
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if entry.metadata().is_ok_and(|m| m.len() > max_file_bytes) {
            continue;
        }
        let Ok(bytes) = fs::read(path) else {
            continue;
        };
        if looks_binary(&bytes) {
            continue;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };

        for (i, line) in text.lines().enumerate() {
            if let Some(m) = regex.find(line) {
                results.push(SearchResult {
                    path: path.to_path_buf(),
                    line_number: i + 1,
                    line: line.to_owned(),
                    match_start: m.start(),
                    match_end: m.end(),
                });
                if results.len() >= limit {
                    return Ok(results);
                }
            }
        }
    }

    Ok(results)
}
