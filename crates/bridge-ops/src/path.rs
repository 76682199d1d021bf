//! Path-safety validation
//!
//! [`SafePath`] is the only way a handler receives a filesystem target. A
//! value of this type is absolute and contains no parent-directory segment.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};

/// Reasons a path is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty path string
    #[error("path is empty")]
    Empty,

    /// Relative path where an absolute one is required
    #[error("path must be absolute: {0}")]
    NotAbsolute(String),

    /// Path contains a `..` segment
    #[error("path traversal is not allowed: {0}")]
    Traversal(String),

    /// No project directory to resolve a relative path against
    #[error("no project path is set")]
    NoProjectRoot,
}

/// Absolute path without parent-directory segments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafePath(PathBuf);

impl SafePath {
    /// Validate a caller-supplied absolute path
    ///
    /// # Errors
    /// - `PathError::Empty` for an empty string
    /// - `PathError::Traversal` if any segment is `..`
    /// - `PathError::NotAbsolute` for a relative path
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if has_parent_segment(raw) {
            return Err(PathError::Traversal(raw.to_string()));
        }
        let path = Path::new(raw);
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(raw.to_string()));
        }
        Ok(Self(path.to_path_buf()))
    }

    /// Resolve a project-relative path under `root`
    ///
    /// Leading separators are ignored, so `/src/a.rs` and `src/a.rs` name the
    /// same file. The raw string is checked for `..` before joining.
    ///
    /// # Errors
    /// - `PathError::Empty` for an empty string
    /// - `PathError::Traversal` if any segment is `..`
    pub fn resolve_under(root: &SafePath, relative: &str) -> Result<Self, PathError> {
        if has_parent_segment(relative) {
            return Err(PathError::Traversal(relative.to_string()));
        }
        let trimmed = relative.trim_start_matches(['/', '\\']);
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(root.0.join(trimmed)))
    }

    /// Borrow as a [`Path`]
    #[inline]
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Parent directory, if any
    #[must_use]
    pub fn parent(&self) -> Option<&Path> {
        self.0.parent()
    }
}

impl Display for SafePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for SafePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

fn has_parent_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == "..")
        || Path::new(raw)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}
