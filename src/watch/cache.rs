// src/watch/cache.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::trace;

use crate::fs::{FileStamp, FileSystem};

/// Process-wide cache of file stamps (size + modification time).
///
/// Modify events refresh an entry eagerly, so the debounced fire that
/// follows compares against a fresh stamp without stat-ing again.
#[derive(Debug, Default)]
pub struct StampCache {
    stamps: HashMap<PathBuf, FileStamp>,
}

impl StampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached stamp for `path`, stat-ing on a miss.
    pub fn get_or_stat(&mut self, fs: &dyn FileSystem, path: &Path) -> Result<FileStamp> {
        if let Some(stamp) = self.stamps.get(path) {
            return Ok(*stamp);
        }
        trace!("stamp cache miss for {:?}", path);
        self.refresh(fs, path)
    }

    /// Re-stat `path` and store the result.
    pub fn refresh(&mut self, fs: &dyn FileSystem, path: &Path) -> Result<FileStamp> {
        let stamp = fs.stamp(path)?;
        self.stamps.insert(path.to_path_buf(), stamp);
        Ok(stamp)
    }

    /// Forget `path` (created, removed or renamed).
    pub fn invalidate(&mut self, path: &Path) {
        if self.stamps.remove(path).is_some() {
            trace!("invalidated stamp for {:?}", path);
        }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn cached_stamp_survives_until_refreshed() {
        let fs = MockFileSystem::new();
        let path = Path::new("/ws/a.ts");
        fs.add_file(path, "one");

        let mut cache = StampCache::new();
        let first = cache.get_or_stat(&fs, path).unwrap();

        fs.add_file(path, "two!");
        assert_eq!(cache.get_or_stat(&fs, path).unwrap(), first);

        let refreshed = cache.refresh(&fs, path).unwrap();
        assert_ne!(refreshed, first);

        cache.invalidate(path);
        assert!(cache.is_empty());
    }
}
