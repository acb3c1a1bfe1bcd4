//! Path validation
//!
//! Virtual paths are absolute, `/`-separated strings confined to the
//! served root. Resolution is purely lexical: `.` and `..` segments are
//! collapsed without touching the filesystem, and any `..` that would
//! climb above the root rejects the whole path instead of clamping it.

use std::path::{Path, PathBuf};

use crate::error::PathError;

/// Join a command argument onto the current working directory.
///
/// Absolute arguments replace the working directory; relative ones are
/// appended.
pub fn build_path(cwd: &str, arg: &str) -> String {
    if arg.starts_with('/') {
        return arg.to_string();
    }

    if cwd == "/" {
        return format!("/{}", arg);
    }

    format!("{}/{}", cwd, arg)
}

/// Collapse `.` and `..` segments of an absolute virtual path.
///
/// Returns the normalized absolute path without a trailing slash (except
/// for the root itself). A `..` with nothing left to pop is a traversal
/// attempt and is rejected.
pub fn resolve_path(path: &str) -> Result<String, PathError> {
    if !path.starts_with('/') {
        return Err(PathError::InvalidPath(path.to_string()));
    }

    let mut components: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(PathError::Traversal(path.to_string()));
                }
            }
            name => components.push(name),
        }
    }

    if components.is_empty() {
        return Ok("/".to_string());
    }

    Ok(format!("/{}", components.join("/")))
}

/// Join and resolve a command argument against the working directory.
pub fn resolve_against(cwd: &str, arg: &str) -> Result<String, PathError> {
    if arg.is_empty() {
        return Err(PathError::InvalidPath(arg.to_string()));
    }

    resolve_path(&build_path(cwd, arg))
}

/// Map a resolved virtual path onto the served root.
pub fn to_real(root: &Path, virtual_path: &str) -> PathBuf {
    root.join(virtual_path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_path() {
        assert_eq!(build_path("/", "file.txt"), "/file.txt");
        assert_eq!(build_path("/sub", "file.txt"), "/sub/file.txt");
        assert_eq!(build_path("/sub", "/other"), "/other");
    }

    #[test]
    fn test_resolve_collapses_segments() {
        assert_eq!(resolve_path("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(resolve_path("/a/./b/").unwrap(), "/a/b");
        assert_eq!(resolve_path("/a/..").unwrap(), "/");
        assert_eq!(resolve_path("/").unwrap(), "/");
        assert_eq!(resolve_path("//a///b").unwrap(), "/a/b");
    }

    #[test]
    fn test_resolve_rejects_escape() {
        // rejected, not clamped to the root
        assert_eq!(
            resolve_path("/.."),
            Err(PathError::Traversal("/..".to_string()))
        );
        assert_eq!(
            resolve_path("/a/../../b"),
            Err(PathError::Traversal("/a/../../b".to_string()))
        );
        assert!(resolve_against("/sub", "../../etc/passwd").is_err());
    }

    #[test]
    fn test_resolve_against_stays_inside_root() {
        assert_eq!(resolve_against("/sub", "..").unwrap(), "/");
        assert_eq!(resolve_against("/sub", "dir/file").unwrap(), "/sub/dir/file");
        assert_eq!(resolve_against("/", "a/../b").unwrap(), "/b");
        assert!(resolve_against("/", "..").is_err());
    }

    #[test]
    fn test_empty_argument_rejected() {
        assert!(resolve_against("/", "").is_err());
    }

    #[test]
    fn test_to_real() {
        let root = Path::new("/srv/ftp");
        assert_eq!(to_real(root, "/"), PathBuf::from("/srv/ftp"));
        assert_eq!(to_real(root, "/a/b"), PathBuf::from("/srv/ftp/a/b"));
    }
}
