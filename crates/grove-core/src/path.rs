//! Path normalization
//!
//! Every path crossing the workspace boundary is an absolute path with `/`
//! separators and no empty, `.` or `..` segments. Callers normalize once, at
//! the edge; everything inside compares paths as plain strings.

use std::path::Path;

/// Normalize a path lexically. Relative paths are resolved against the
/// current directory; symlinks are not followed.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_str(&absolute.to_string_lossy())
}

/// Lexical normalization of an already absolute path string.
pub fn normalize_str(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let (prefix, rest) = split_root(&unified);

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(unified.len());
    normalized.push_str(prefix);
    normalized.push('/');
    normalized.push_str(&segments.join("/"));
    normalized
}

/// True if `path` is exactly what [`normalize_str`] would produce for it.
pub fn is_normalized(path: &str) -> bool {
    is_absolute(path) && normalize_str(path) == path
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || has_drive_prefix(path)
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// Split `C:/x` into (`C:`, `/x`) and `/x` into (``, `/x`).
fn split_root(path: &str) -> (&str, &str) {
    if has_drive_prefix(path) {
        path.split_at(2)
    } else {
        ("", path)
    }
}

/// Debug-build check for the normalized-path contract.
#[macro_export]
macro_rules! debug_assert_normalized {
    ($path:expr) => {
        debug_assert!(
            $crate::path::is_normalized($path),
            "path not normalized: {}",
            $path
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_segments() {
        assert_eq!(normalize_str("/a/./b//c/../d"), "/a/b/d");
        assert_eq!(normalize_str("/.."), "/");
        assert_eq!(normalize_str("C:\\src\\Main.as"), "C:/src/Main.as");
    }

    #[test]
    fn test_is_normalized() {
        assert!(is_normalized("/src/pkg/Foo.as"));
        assert!(is_normalized("/"));
        assert!(!is_normalized("src/Foo.as"));
        assert!(!is_normalized("/src/../Foo.as"));
        assert!(!is_normalized("/src/Foo.as/"));
        assert!(!is_normalized("/src\\Foo.as"));
    }

    #[test]
    fn test_normalize_relative_is_absolute() {
        let normalized = normalize_path("some/relative/file.as");
        assert!(is_normalized(&normalized));
        assert!(normalized.ends_with("/some/relative/file.as"));
    }
}
