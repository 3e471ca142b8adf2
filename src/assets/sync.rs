// src/assets/sync.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::assets::quantize;
use crate::context::BuildContext;
use crate::fs::FileSystem;
use crate::types::Stage;
use crate::watch::glob::{root_and_depth, CwdGlob};
use crate::watch::{build_fn, Subscription};
use crate::workspace::SyncEntry;

/// Modification times closer than this are treated as equal.
const MTIME_BUCKET_MS: u64 = 300;

/// Register one content-mode subscription per declared sync entry.
pub async fn sync(ctx: Arc<BuildContext>) -> Result<()> {
    if !ctx.begin(Stage::Sync, None) {
        return Ok(());
    }
    let mut subs = Vec::new();
    for pkg in &ctx.building {
        for entry in &pkg.sync {
            subs.push(subscription(&ctx, &pkg.name, &pkg.root, entry)?);
        }
    }
    ctx.watcher.watch_all(subs).await
}

fn subscription(
    ctx: &Arc<BuildContext>,
    pkg: &str,
    pkg_root: &Path,
    entry: &SyncEntry,
) -> Result<Subscription> {
    let scope = root_and_depth(ctx.fs().as_ref(), pkg_root, &entry.src);
    let dest_root = ctx.paths.root.join(&entry.dest);
    let glob = CwdGlob::new(pkg_root, &entry.src)?;

    let fs = Arc::clone(ctx.fs());
    let (name, src, dest) = (pkg.to_string(), entry.src.clone(), entry.dest.clone());
    let build = build_fn(move |changed: Vec<PathBuf>, _all| {
        let fs = Arc::clone(&fs);
        let scope_dir = scope.dir.clone();
        let dest_root = dest_root.clone();
        info!(pkg = %name, "Sync '{src}' to '{dest}'");
        async move {
            tokio::task::spawn_blocking(move || {
                for file in changed {
                    let rel = file.strip_prefix(&scope_dir).unwrap_or(&file);
                    sync_one(fs.as_ref(), &file, &dest_root.join(rel))?;
                }
                Ok(())
            })
            .await
            .context("sync task panicked")?
        }
    });

    Ok(Subscription::new(vec![glob], build)
        .debounce(ctx.settings.debounce.sync())
        .stage(Stage::Sync)
        .pkg(pkg))
}

/// Copy `src` over `dest` unless `dest` exists with a modification time in
/// the same bucket.
///
/// Returns whether a copy happened. A vanished source is skipped.
pub fn sync_one(fs: &dyn FileSystem, src: &Path, dest: &Path) -> Result<bool> {
    let Ok(src_stamp) = fs.stamp(src) else {
        return Ok(false);
    };
    if let Ok(dest_stamp) = fs.stamp(dest) {
        if quantize(src_stamp.modified_ms, MTIME_BUCKET_MS)
            == quantize(dest_stamp.modified_ms, MTIME_BUCKET_MS)
        {
            return Ok(false);
        }
    }
    fs.copy_with_times(src, dest)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn copies_missing_and_stale_files_only() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/ui/site/static/logo.svg", "<svg/>");
        let src = Path::new("/ws/ui/site/static/logo.svg");
        let dest = Path::new("/ws/public/logo.svg");

        assert!(sync_one(&fs, src, dest).unwrap());
        assert_eq!(fs.read(dest).unwrap(), b"<svg/>");
        // Same times after the copy.
        assert!(!sync_one(&fs, src, dest).unwrap());

        fs.add_file("/ws/ui/site/static/logo.svg", "<svg></svg>");
        assert!(sync_one(&fs, src, dest).unwrap());
        assert_eq!(fs.read(dest).unwrap(), b"<svg></svg>");
    }

    #[test]
    fn vanished_source_is_skipped() {
        let fs = MockFileSystem::new();
        assert!(!sync_one(&fs, Path::new("/gone"), Path::new("/out/gone")).unwrap());
    }
}
