// src/i18n.rs

//! Localization stage: publish hashed copies of the compiled locale
//! scripts and record them as `i18n/<locale>`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::assets::short_hash;
use crate::context::{lock, BuildContext};
use crate::fs::FileSystem;
use crate::manifest::{self, Category, Fragment, FragmentTable};
use crate::types::Stage;
use crate::watch::{build_fn, CwdGlob, Subscription};

pub async fn i18n(ctx: Arc<BuildContext>) -> Result<()> {
    if !ctx.begin(Stage::I18n, None) {
        return Ok(());
    }
    let glob = CwdGlob::new(&ctx.paths.root, &ctx.paths.i18n_glob)?;
    let locales: Arc<Mutex<FragmentTable>> = Arc::default();

    let task_ctx = Arc::clone(&ctx);
    let sub = Subscription::new(
        vec![glob],
        build_fn(move |changed: Vec<PathBuf>, _all| {
            let ctx = Arc::clone(&task_ctx);
            let locales = Arc::clone(&locales);
            async move {
                let fs = Arc::clone(ctx.fs());
                let dest = ctx.paths.js_out.join("i18n");
                let published = tokio::task::spawn_blocking(move || {
                    changed
                        .iter()
                        .map(|file| publish_locale(fs.as_ref(), file, &dest))
                        .collect::<Result<Vec<_>>>()
                })
                .await
                .context("i18n task panicked")?;

                let published = match published {
                    Ok(published) => published,
                    Err(err) => {
                        ctx.done(Stage::I18n, 1);
                        return Err(err);
                    }
                };
                let snapshot = {
                    let mut table = lock(&locales);
                    for (name, hash) in published {
                        table.insert(name, Fragment::hashed(hash));
                    }
                    table.clone()
                };
                manifest::update(&ctx, Category::I18n, &snapshot, true);
                ctx.done(Stage::I18n, 0);
                Ok(())
            }
        }),
    )
    .key("i18n")
    .stage(Stage::I18n);
    ctx.watcher.watch(sub).await
}

/// Copy one compiled locale script to `dest/<locale>.<hash>.js`.
///
/// Returns the manifest name and hash.
pub fn publish_locale(fs: &dyn FileSystem, file: &Path, dest: &Path) -> Result<(String, String)> {
    let locale = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("locale file {:?} has no name", file))?;
    let content = fs.read(file)?;
    let hash = short_hash(&content);
    fs.write(&dest.join(format!("{locale}.{hash}.js")), &content)?;
    Ok((format!("i18n/{locale}"), hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn locale_is_published_under_its_hash() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/translation/js/fr-FR.js", "window.i18n={}");

        let (name, hash) = publish_locale(
            &fs,
            Path::new("/ws/translation/js/fr-FR.js"),
            Path::new("/ws/public/compiled/i18n"),
        )
        .unwrap();

        assert_eq!(name, "i18n/fr-FR");
        assert_eq!(hash, short_hash(b"window.i18n={}"));
        assert!(fs.exists(Path::new(&format!("/ws/public/compiled/i18n/fr-FR.{hash}.js"))));
    }
}
