// src/watch/glob.rs

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

use crate::fs::FileSystem;

/// Segments walked below a root when a pattern has no depth bound.
///
/// Recursive patterns (`**`) and bare directory targets are scanned this
/// deep, which covers every realistic package layout.
pub const UNBOUNDED_DEPTH: usize = 10;

/// A glob pattern anchored at a directory.
///
/// `pattern` is relative to `cwd` and uses `/` separators. `*` never crosses
/// a separator; `**` does.
#[derive(Clone)]
pub struct CwdGlob {
    pub cwd: PathBuf,
    pub pattern: String,
    matcher: GlobMatcher,
}

impl fmt::Debug for CwdGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CwdGlob")
            .field("cwd", &self.cwd)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CwdGlob {
    fn eq(&self, other: &Self) -> bool {
        self.cwd == other.cwd && self.pattern == other.pattern
    }
}

impl CwdGlob {
    pub fn new(cwd: impl Into<PathBuf>, pattern: impl Into<String>) -> Result<Self> {
        let cwd = cwd.into();
        let pattern = pattern.into();
        let matcher = compile(&pattern)?;
        Ok(Self {
            cwd,
            pattern,
            matcher,
        })
    }

    /// Whether the absolute `path` is matched by this glob.
    ///
    /// A pattern without wildcards also matches everything below it, so a
    /// bare directory target covers its whole tree.
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.cwd) else {
            return false;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if self.matcher.is_match(rel.as_str()) {
            return true;
        }
        !self.pattern.contains(GLOB_CHARS)
            && rel
                .strip_prefix(self.pattern.trim_end_matches('/'))
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The directory to watch and how many levels below it.
    pub fn scope(&self, fs: &dyn FileSystem) -> WatchScope {
        root_and_depth(fs, &self.cwd, &self.pattern)
    }

    /// Every file currently matched, sorted.
    pub fn expand(&self, fs: &dyn FileSystem) -> Vec<PathBuf> {
        let scope = self.scope(fs);
        let mut files = Vec::new();
        for dir in subfolders(fs, &scope.dir, scope.depth) {
            let Ok(entries) = fs.read_dir(&dir) else {
                continue;
            };
            files.extend(
                entries
                    .into_iter()
                    .filter(|p| fs.is_file(p) && self.matches(p)),
            );
        }
        files.sort();
        files
    }
}

/// Sorted union of every file matched by `globs`.
pub fn expand_all(fs: &dyn FileSystem, globs: &[CwdGlob]) -> Vec<PathBuf> {
    let set: BTreeSet<PathBuf> = globs.iter().flat_map(|g| g.expand(fs)).collect();
    set.into_iter().collect()
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {pattern}"))?;
    Ok(glob.compile_matcher())
}

/// Where a glob's files can live: `dir` itself plus up to `depth` levels of
/// subdirectories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchScope {
    pub dir: PathBuf,
    pub depth: usize,
}

const GLOB_CHARS: &[char] = &['*', '?', '!', '{', '}', '[', ']', '(', ')'];

/// Resolve the watch root and recursion depth of `pattern` relative to `cwd`.
///
/// - A plain file path watches its parent at depth 0.
/// - A plain directory path watches the directory itself, unbounded.
/// - A pattern containing `**` is unbounded below the segment before the
///   first wildcard.
/// - Otherwise the depth is the number of `/` after the first wildcard.
pub fn root_and_depth(fs: &dyn FileSystem, cwd: &Path, pattern: &str) -> WatchScope {
    let glob_index = pattern.find(GLOB_CHARS);

    let Some(index) = glob_index else {
        let target = cwd.join(pattern);
        if fs.is_dir(&target) {
            return WatchScope {
                dir: target,
                depth: UNBOUNDED_DEPTH,
            };
        }
        let dir = target.parent().map(Path::to_path_buf).unwrap_or(target);
        return WatchScope { dir, depth: 0 };
    };

    let prefix = &pattern[..index];
    let root = match prefix.rfind('/') {
        Some(slash) => &prefix[..slash],
        None => "",
    };
    let dir = if root.is_empty() {
        cwd.to_path_buf()
    } else {
        cwd.join(root)
    };

    let depth = if pattern.contains("**") {
        UNBOUNDED_DEPTH
    } else {
        pattern[index..].matches('/').count()
    };
    WatchScope { dir, depth }
}

/// `dir` followed by every subdirectory at most `depth` levels below it.
///
/// A missing `dir` yields an empty list.
pub fn subfolders(fs: &dyn FileSystem, dir: &Path, depth: usize) -> Vec<PathBuf> {
    if !fs.is_dir(dir) {
        return Vec::new();
    }
    let mut out = vec![dir.to_path_buf()];
    let mut frontier = vec![dir.to_path_buf()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for parent in &frontier {
            let Ok(entries) = fs.read_dir(parent) else {
                continue;
            };
            next.extend(entries.into_iter().filter(|p| fs.is_dir(p)));
        }
        if next.is_empty() {
            break;
        }
        out.extend(next.iter().cloned());
        frontier = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn scope(fs: &MockFileSystem, pattern: &str) -> (String, usize) {
        let s = root_and_depth(fs, Path::new("/ws/ui/site"), pattern);
        (s.dir.to_string_lossy().into_owned(), s.depth)
    }

    #[test]
    fn root_and_depth_for_common_shapes() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/ui/site/src/site.ts", "x");
        fs.add_dir("/ws/ui/site/font");

        assert_eq!(scope(&fs, "src/*.ts"), ("/ws/ui/site/src".into(), 0));
        assert_eq!(scope(&fs, "src/site*.ts"), ("/ws/ui/site/src".into(), 0));
        assert_eq!(scope(&fs, "*/package.json"), ("/ws/ui/site".into(), 1));
        assert_eq!(
            scope(&fs, "css/**/*.scss"),
            ("/ws/ui/site/css".into(), UNBOUNDED_DEPTH)
        );
        assert_eq!(scope(&fs, "src/site.ts"), ("/ws/ui/site/src".into(), 0));
        assert_eq!(
            scope(&fs, "font"),
            ("/ws/ui/site/font".into(), UNBOUNDED_DEPTH)
        );
    }

    #[test]
    fn star_does_not_cross_directories() {
        let g = CwdGlob::new("/ws", "src/*.ts").unwrap();
        assert!(g.matches(Path::new("/ws/src/a.ts")));
        assert!(!g.matches(Path::new("/ws/src/deep/a.ts")));
        assert!(!g.matches(Path::new("/elsewhere/src/a.ts")));

        let deep = CwdGlob::new("/ws", "src/**/*.ts").unwrap();
        assert!(deep.matches(Path::new("/ws/src/deep/a.ts")));

        let dir = CwdGlob::new("/ws", "font").unwrap();
        assert!(dir.matches(Path::new("/ws/font/a.woff2")));
        assert!(!dir.matches(Path::new("/ws/fonts.txt")));
    }

    #[test]
    fn expand_walks_only_the_needed_depth() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/ui/a/package.json", "{}");
        fs.add_file("/ws/ui/b/package.json", "{}");
        fs.add_file("/ws/ui/b/nested/package.json", "{}");
        fs.add_file("/ws/ui/package.json", "{}");

        let g = CwdGlob::new("/ws/ui", "*/package.json").unwrap();
        assert_eq!(
            g.expand(&fs),
            vec![
                PathBuf::from("/ws/ui/a/package.json"),
                PathBuf::from("/ws/ui/b/package.json")
            ]
        );
        assert!(CwdGlob::new("/ws/missing", "*.js").unwrap().expand(&fs).is_empty());
    }

    #[test]
    fn expand_all_deduplicates_overlapping_globs() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/css/a.scss", "");
        fs.add_file("/ws/css/build/b.scss", "");
        let globs = [
            CwdGlob::new("/ws", "css/**/*.scss").unwrap(),
            CwdGlob::new("/ws", "css/build/*.scss").unwrap(),
        ];
        assert_eq!(expand_all(&fs, &globs).len(), 2);
    }
}
