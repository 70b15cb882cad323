//! Default [`PathOracle`]: everything under the project roots is fair game.

use std::path::{Component, Path, PathBuf};

use crate::permissions::{PathDecision, PathOperation, PathOracle};

/// Directory names inside a project whose contents are only written after explicit approval.
const GUARDED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Path oracle bounded by one or more project roots.
///
/// Inside a root, reads and writes are allowed, except that writes into VCS metadata need
/// approval. Outside every root, reads need approval and writes are denied.
#[derive(Debug, Clone)]
pub struct ProjectPathOracle {
    roots: Vec<PathBuf>,
    base: PathBuf,
}

impl ProjectPathOracle {
    /// Relative paths are resolved against `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = resolve_path(&absolutize(&root.into()));
        Self {
            roots: vec![root.clone()],
            base: root,
        }
    }

    #[must_use]
    pub fn with_extra_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(resolve_path(&absolutize(&root.into())));
        self
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn containing_root(&self, resolved: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .find(|root| resolved.starts_with(root))
            .map(PathBuf::as_path)
    }
}

impl PathOracle for ProjectPathOracle {
    fn validate(&self, path: &Path, operation: PathOperation) -> PathDecision {
        let Some(resolved) = self.canonicalize(path) else {
            return PathDecision::Denied {
                reason: "empty path".into(),
            };
        };

        let Some(root) = self.containing_root(&resolved) else {
            return match operation {
                PathOperation::Read => PathDecision::RequiresApproval {
                    reason: format!("{} is outside the project", resolved.display()),
                },
                PathOperation::Write => PathDecision::Denied {
                    reason: format!("{} is outside the project", resolved.display()),
                },
            };
        };

        if operation == PathOperation::Write {
            let guarded = resolved
                .strip_prefix(root)
                .ok()
                .and_then(|rel| rel.components().next())
                .and_then(|first| first.as_os_str().to_str())
                .is_some_and(|first| GUARDED_DIRS.contains(&first));
            if guarded {
                return PathDecision::RequiresApproval {
                    reason: "write into version-control metadata".into(),
                };
            }
        }

        PathDecision::Allowed
    }

    fn canonicalize(&self, path: &Path) -> Option<PathBuf> {
        if path.as_os_str().is_empty() {
            return None;
        }
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        };
        Some(resolve_path(&joined))
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

/// Normalize `.` and `..` lexically, then canonicalize through the nearest existing ancestor.
///
/// Works for paths that do not exist yet, which is what write targets usually are.
#[must_use]
pub fn resolve_path(path: &Path) -> PathBuf {
    resolve_via_ancestors(&lexical_normalize(path))
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize a path by walking up to the nearest existing ancestor.
fn resolve_via_ancestors(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut suffix = PathBuf::new();
    while !existing.exists() {
        if let Some(parent) = existing.parent() {
            if let Some(name) = existing.file_name() {
                suffix = PathBuf::from(name).join(&suffix);
            }
            existing = parent;
        } else {
            break;
        }
    }
    let base = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    if suffix.as_os_str().is_empty() {
        base
    } else {
        base.join(&suffix)
    }
}
