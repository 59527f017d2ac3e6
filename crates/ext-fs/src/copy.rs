//! Recursive directory copy and best-effort removal.

use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Recursively copy the contents of `src` into `dst`.
///
/// `dst` is created if it does not exist. Symlinks are followed (the copy
/// contains the link target's content). Fails on the first I/O error.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(Error::NotADirectory {
            path: src.to_path_buf(),
        });
    }
    fs::create_dir_all(dst).map_err(|e| Error::io(dst, e))?;

    for entry in fs::read_dir(src).map_err(|e| Error::io(src, e))? {
        let entry = entry.map_err(|e| Error::io(src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| Error::io(&src_path, e))?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).map_err(|e| Error::io(&src_path, e))?;
        }
    }

    Ok(())
}

/// Remove a directory tree, logging instead of failing.
///
/// Returns `true` if the directory is gone afterwards. Used for uninstall
/// cleanup where a leftover directory must not abort the logical operation.
pub fn remove_dir_best_effort(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("failed to remove {}: {e}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_nested_tree() {
        let src = tempfile::TempDir::new().unwrap();
        let dst = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("sub/inner")).unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();
        fs::write(src.path().join("sub/inner/leaf.txt"), "leaf").unwrap();

        let target = dst.path().join("ext");
        copy_dir_recursive(src.path(), &target).unwrap();

        assert_eq!(fs::read_to_string(target.join("top.txt")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(target.join("sub/inner/leaf.txt")).unwrap(),
            "leaf"
        );
    }

    #[test]
    fn test_copy_missing_source_errors() {
        let dst = tempfile::TempDir::new().unwrap();
        let err =
            copy_dir_recursive(Path::new("/nonexistent/src"), dst.path()).unwrap_err();
        assert!(matches!(err, Error::NotADirectory { .. }));
    }

    #[test]
    fn test_remove_best_effort_missing_is_ok() {
        assert!(remove_dir_best_effort(Path::new("/nonexistent/dir/xyz")));
    }

    #[test]
    fn test_remove_best_effort_removes_tree() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("tree");
        fs::create_dir_all(target.join("nested")).unwrap();
        fs::write(target.join("nested/file.txt"), "x").unwrap();

        assert!(remove_dir_best_effort(&target));
        assert!(!target.exists());
    }
}
