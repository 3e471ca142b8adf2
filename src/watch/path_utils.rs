// src/watch/path_utils.rs

//! Path helpers shared by the watcher and the asset pipelines.

use std::path::{Path, PathBuf};

/// `path` relative to `root` with forward slashes.
///
/// Falls back to canonicalized paths when the prefixes differ (symlinked
/// temp dirs on macOS). Returns `None` when `path` is not below `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    if let (Ok(root_canon), Ok(path_canon)) = (root.canonicalize(), path.canonicalize()) {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
    }

    None
}

/// Final path component as a string (empty when there is none).
pub fn file_name_str(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parent directory, or `path` itself for roots.
pub fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_str_strips_root() {
        assert_eq!(
            relative_str(Path::new("/ws/ui/site"), Path::new("/ws/ui/site/src/a.ts")),
            Some("src/a.ts".to_string())
        );
        assert_eq!(
            relative_str(Path::new("/ws/ui/site"), Path::new("/nowhere/a.ts")),
            None
        );
    }
}
