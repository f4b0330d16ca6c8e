//! Helpers for the virtual path syntax.
//!
//! Virtual paths are forward-slash separated and relative: no leading or
//! trailing slash, no empty segments, no `..`. They are compared as byte
//! strings, case-sensitively. The parent of a single segment is the empty
//! string.

use crate::fs::error::{StoreError, StoreResult};

pub fn validate_path(path: &str) -> StoreResult<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath("empty path".to_string()));
    }

    if path.contains('\0') {
        return Err(StoreError::InvalidPath(format!("{path}: contains NUL character")));
    }

    if path.starts_with('/') || path.ends_with('/') {
        return Err(StoreError::InvalidPath(format!("{path}: must be relative without trailing slash")));
    }

    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(StoreError::InvalidPath(format!("{path}: empty segment")));
        }
        if segment == ".." {
            return Err(StoreError::InvalidPath(format!("{path}: '..' segment")));
        }
    }

    Ok(())
}

/// Parent of a path; the empty string for a single segment.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// Final segment of a path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// All prefixes of a path in ascending length, ending with the path itself.
///
/// `prefixes("a/b/c")` is `["a", "a/b", "a/b/c"]`.
pub fn prefixes(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    for (index, _) in path.match_indices('/') {
        result.push(path[..index].to_string());
    }
    result.push(path.to_string());
    result
}
