//! Root-confined path resolution.
//!
//! Resolution is purely lexical: it never touches the filesystem and does not
//! follow symlinks. A protocol path is slash-cleaned (so `..` can never climb
//! above `/`) and then joined onto the scope root, which means a resolved path
//! is always the root itself or one of its descendants.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use crate::error::{Result, VfsError};

/// The directory a user's view of the filesystem is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRoot {
    root: PathBuf,
}

impl ScopeRoot {
    /// Create a scope root. `.` components and trailing separators are
    /// dropped; an empty path means the current directory.
    ///
    /// The same path is handed to the real filesystem, so confinement checks
    /// and I/O always agree on where the root is.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: normalize_root(root.as_ref()),
        }
    }

    /// The normalized root path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a protocol-relative path (raw, percent-decoded bytes) to a
    /// real path inside the root.
    ///
    /// Rejects NUL bytes, non UTF-8 names, and on platforms whose separator
    /// is not `/`, names containing that separator.
    pub fn resolve(&self, name: &[u8]) -> Result<PathBuf> {
        let name = std::str::from_utf8(name)
            .map_err(|_| VfsError::PathRejected(String::from_utf8_lossy(name).into_owned()))?;

        if name.contains('\0') || (MAIN_SEPARATOR != '/' && name.contains(MAIN_SEPARATOR)) {
            return Err(VfsError::PathRejected(name.to_string()));
        }

        let cleaned = slash_clean(name);
        let relative = cleaned.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(self.root.clone());
        }

        let mut resolved = self.root.clone();
        for segment in relative.split('/') {
            resolved.push(segment);
        }
        Ok(resolved)
    }

    /// Whether a resolved path denotes the root itself.
    pub fn is_root(&self, resolved: &Path) -> bool {
        resolved == self.root
    }
}

/// Clean a slash-separated path as if it were rooted at `/`.
///
/// The result always starts with `/`, contains no `.` or empty segments, and
/// `..` segments are resolved without ever leaving `/`.
pub fn slash_clean(name: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = String::with_capacity(name.len() + 1);
    out.push('/');
    out.push_str(&segments.join("/"));
    out
}

/// Drop `.` components and redundant separators from a configured root.
///
/// `..` is kept as written: folding it lexically changes the meaning of a
/// path that passes through a symlink.
fn normalize_root(path: &Path) -> PathBuf {
    let out: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
