// src/assets/hash.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::assets::{as_hashed, short_hash};
use crate::context::{lock, BuildContext};
use crate::fs::FileSystem;
use crate::manifest::{self, Category, Fragment, FragmentTable};
use crate::types::Stage;
use crate::watch::path_utils::relative_str;
use crate::watch::{build_fn, CwdGlob, Subscription};

/// Hashes computed so far, shared by every hash subscription of a build.
type Hashed = Arc<Mutex<FragmentTable>>;

/// Register the hash subscriptions of every building package.
///
/// Plain entries share one subscription. Each entry with an `update` file
/// gets its own, because the rewrite needs that entry's full match list.
pub async fn hash(ctx: Arc<BuildContext>) -> Result<()> {
    if !ctx.begin(Stage::Sync, None) {
        return Ok(());
    }
    let hashed: Hashed = Arc::default();
    let mut plain = Vec::new();
    let mut subs = Vec::new();

    for pkg in &ctx.building {
        for entry in &pkg.hash {
            info!(pkg = %pkg.name, "Hash '{}'", entry.glob);
            let glob = CwdGlob::new(&ctx.paths.out_dir, &entry.glob)?;
            match &entry.update {
                None => plain.push(glob),
                Some(update) => subs.push(update_subscription(
                    &ctx,
                    glob,
                    pkg.root.join(update),
                    update.clone(),
                    Arc::clone(&hashed),
                )),
            }
        }
    }

    let task_ctx = Arc::clone(&ctx);
    let table = Arc::clone(&hashed);
    subs.push(
        Subscription::new(
            plain,
            build_fn(move |changed: Vec<PathBuf>, _all| {
                let ctx = Arc::clone(&task_ctx);
                let table = Arc::clone(&table);
                async move {
                    hash_files(&ctx, &table, changed).await?;
                    let snapshot = lock(&table).clone();
                    manifest::update(&ctx, Category::Hashed, &snapshot, true);
                    Ok(())
                }
            }),
        )
        .debounce(ctx.settings.debounce.hash())
        .stage(Stage::Sync),
    );

    ctx.watcher.watch_all(subs).await
}

fn update_subscription(
    ctx: &Arc<BuildContext>,
    glob: CwdGlob,
    update_path: PathBuf,
    update_name: String,
    hashed: Hashed,
) -> Subscription {
    let task_ctx = Arc::clone(ctx);
    Subscription::new(
        vec![glob],
        build_fn(move |changed: Vec<PathBuf>, all: Vec<PathBuf>| {
            let ctx = Arc::clone(&task_ctx);
            let hashed = Arc::clone(&hashed);
            let update_path = update_path.clone();
            let update_name = update_name.clone();
            async move {
                hash_files(&ctx, &hashed, changed).await?;

                let mut renames = BTreeMap::new();
                {
                    let table = lock(&hashed);
                    for file in &all {
                        let rel = out_relative(&ctx, file)?;
                        let hash = table
                            .get(&rel)
                            .and_then(|f| f.hash.clone())
                            .ok_or_else(|| anyhow!("no hash recorded for '{rel}'"))?;
                        let renamed = as_hashed(&rel, &hash);
                        renames.insert(rel, renamed);
                    }
                }

                let fs = Arc::clone(ctx.fs());
                let hashed_out = ctx.paths.hashed_out.clone();
                let name_for_task = update_name.clone();
                let hash = tokio::task::spawn_blocking(move || {
                    rewrite_references(fs.as_ref(), &update_path, &name_for_task, &renames, &hashed_out)
                })
                .await
                .context("hash update task panicked")??;

                let snapshot = {
                    let mut table = lock(&hashed);
                    table.insert(update_name.clone(), Fragment::hashed(hash));
                    table.clone()
                };
                manifest::update(&ctx, Category::Hashed, &snapshot, true);
                Ok(())
            }
        }),
    )
    .debounce(ctx.settings.debounce.hash())
    .stage(Stage::Sync)
}

fn out_relative(ctx: &BuildContext, file: &Path) -> Result<String> {
    relative_str(&ctx.paths.out_dir, file)
        .ok_or_else(|| anyhow!("{:?} is outside the output directory", file))
}

/// Hash `files` (below the output dir), publish their aliases and record
/// the hashes in `table`.
async fn hash_files(ctx: &Arc<BuildContext>, table: &Hashed, files: Vec<PathBuf>) -> Result<()> {
    let names = files
        .iter()
        .map(|f| out_relative(ctx, f))
        .collect::<Result<Vec<_>>>()?;
    let fs = Arc::clone(ctx.fs());
    let out_dir = ctx.paths.out_dir.clone();
    let hashed_out = ctx.paths.hashed_out.clone();
    let hashes = tokio::task::spawn_blocking(move || {
        names
            .into_iter()
            .map(|name| {
                let hash = hash_link(fs.as_ref(), &out_dir, &hashed_out, &name)?;
                Ok((name, hash))
            })
            .collect::<Result<Vec<_>>>()
    })
    .await
    .context("hash task panicked")??;

    let mut table = lock(table);
    for (name, hash) in hashes {
        table.insert(name, Fragment::hashed(hash));
    }
    Ok(())
}

/// Hash `out_dir/name` and link `hashed_out/<hashed name>` to it.
///
/// An alias that already exists is left alone.
pub fn hash_link(fs: &dyn FileSystem, out_dir: &Path, hashed_out: &Path, name: &str) -> Result<String> {
    let hash = short_hash(&fs.read(&out_dir.join(name))?);
    let link = hashed_out.join(as_hashed(name, &hash));
    if let Err(err) = fs.symlink(&Path::new("..").join(name), &link) {
        debug!("alias {:?} kept: {err:#}", link);
    }
    Ok(hash)
}

/// Replace every original name in the text file at `path` with its hashed
/// name, then write the result under its own hashed name in `hashed_out`.
///
/// Returns the hash of the rewritten text.
pub fn rewrite_references(
    fs: &dyn FileSystem,
    path: &Path,
    name: &str,
    renames: &BTreeMap<String, String>,
    hashed_out: &Path,
) -> Result<String> {
    let text = fs.read_to_string(path)?;
    let result = renames
        .iter()
        .fold(text, |text, (from, to)| text.replace(from.as_str(), to));
    let hash = short_hash(result.as_bytes());
    fs.write(&hashed_out.join(as_hashed(name, &hash)), result.as_bytes())?;
    Ok(hash)
}
