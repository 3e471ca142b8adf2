// src/manifest/mod.rs

//! Manifest aggregation and publication.
//!
//! Stages feed fragment tables through [`update`]. Any accepted change
//! (re)starts one debounce timer per context; when it fires and the
//! workspace is quiescent and complete, the client bootstrap script and the
//! server JSON are written and the dirty flag is cleared. A clean table
//! never publishes, so an unchanged status vector publishes at most once.

pub mod aggregator;
pub mod bootstrap;
pub mod fragment;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::assets::short_hash;
use crate::context::{lock, BuildContext};
use crate::watch::glob::{expand_all, CwdGlob};

pub use aggregator::{Category, Incomplete, ManifestTables};
pub use bootstrap::BootstrapInfo;
pub use fragment::{Fragment, FragmentTable};

/// Apply a fragment update and schedule publication when it changed
/// anything.
pub fn update(ctx: &Arc<BuildContext>, category: Category, table: &FragmentTable, merge: bool) {
    let changed = lock(&ctx.manifest).update(category, table, merge);
    if changed {
        debug!(%category, entries = table.len(), "manifest updated");
        request_publish(ctx);
    }
}

/// (Re)start the publish timer if there is anything to publish.
pub fn request_publish(ctx: &Arc<BuildContext>) {
    if !lock(&ctx.manifest).is_dirty() {
        return;
    }
    let window = ctx.settings.debounce.manifest();
    let task_ctx = Arc::clone(ctx);
    let mut timer = lock(&ctx.manifest_timer);
    if let Some(previous) = timer.take() {
        previous.abort();
    }
    // The timer only sleeps; a re-arm never aborts a write in progress.
    *timer = Some(tokio::spawn(async move {
        tokio::time::sleep(window).await;
        tokio::spawn(async move {
            if let Err(err) = publish(&task_ctx).await {
                warn!("manifest not written: {err:#}");
            }
        });
    }));
}

/// Cancel the publish timer.
pub fn stop(ctx: &BuildContext) {
    if let Some(timer) = lock(&ctx.manifest_timer).take() {
        timer.abort();
    }
}

/// Publish pending changes immediately.
pub async fn flush(ctx: &Arc<BuildContext>) -> Result<bool> {
    stop(ctx);
    publish(ctx).await
}

/// Write the bootstrap script and the server manifest if the workspace is
/// quiescent, complete and something changed since the last write.
///
/// Returns whether anything was written.
pub async fn publish(ctx: &Arc<BuildContext>) -> Result<bool> {
    let _writing = ctx.publishing.lock().await;

    if !ctx.is_quiescent() {
        return Ok(false);
    }
    let snapshot = {
        let tables = lock(&ctx.manifest);
        if !tables.is_dirty() {
            return Ok(false);
        }
        tables.clone()
    };

    if let Err(reason) = is_complete(ctx, &snapshot).await? {
        match reason {
            Incomplete::Script(_) | Incomplete::Style(_) => warn!("{reason}"),
            _ => debug!("manifest incomplete: {reason}"),
        }
        return Ok(false);
    }

    let (commit, message) = git_info(&ctx.paths.root).await;
    let info = BootstrapInfo {
        commit,
        message,
        debug: ctx.settings.debug,
        remote_log: ctx.settings.remote_log.clone(),
    };
    let script = bootstrap::client_script(&info, &snapshot);
    let hash = short_hash(script.as_bytes());
    let client = format!("{script}{}", bootstrap::date_line(Utc::now()));
    let server = bootstrap::server_json(&snapshot, &hash, !ctx.settings.prod)?;

    let fs = Arc::clone(ctx.fs());
    let client_path = ctx.paths.js_out.join(format!("manifest.{hash}.js"));
    let server_path = ctx.paths.manifest_file(ctx.settings.prod);
    tokio::task::spawn_blocking(move || -> Result<()> {
        fs.write(&client_path, client.as_bytes())?;
        fs.write(&server_path, server.as_bytes())?;
        Ok(())
    })
    .await
    .context("manifest writer panicked")??;

    {
        let mut tables = lock(&ctx.manifest);
        if *tables == snapshot {
            tables.mark_clean();
        }
    }
    info!(hash = %hash, "Manifest published");
    Ok(true)
}

/// Every building package's declared modules and style sources have an
/// entry, and at least one locale is present.
async fn is_complete(
    ctx: &Arc<BuildContext>,
    tables: &ManifestTables,
) -> Result<std::result::Result<(), Incomplete>> {
    let task_ctx = Arc::clone(ctx);
    let (scripts, styles) = tokio::task::spawn_blocking(move || {
        let fs = task_ctx.fs().as_ref();
        let mut scripts = Vec::new();
        let mut styles = Vec::new();
        for pkg in &task_ctx.building {
            let globs: Vec<CwdGlob> = pkg
                .modules()
                .filter_map(|m| CwdGlob::new(&pkg.root, m).ok())
                .collect();
            scripts.extend(expand_all(fs, &globs).iter().filter_map(|p| stem(p, ".ts")));
            styles.extend(
                crate::style::style_sources(fs, &pkg.root)
                    .iter()
                    .filter_map(|p| stem(p, ".scss")),
            );
        }
        (scripts, styles)
    })
    .await
    .context("completeness scan panicked")?;

    Ok(tables.check_complete(
        ctx.building.len(),
        ctx.graph.len(),
        scripts.iter().map(String::as_str),
        styles.iter().map(String::as_str),
    ))
}

fn stem(path: &Path, ext: &str) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(name.strip_suffix(ext).unwrap_or(name).to_string())
}

/// Current commit hash and subject. Empty strings outside a repository.
async fn git_info(root: &Path) -> (String, String) {
    async fn git(root: &Path, args: &[&str]) -> String {
        match Command::new("git").args(args).current_dir(root).output().await {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            Ok(_) => String::new(),
            Err(err) => {
                debug!("git {:?}: {err}", args);
                String::new()
            }
        }
    }
    tokio::join!(
        git(root, &["rev-parse", "-q", "HEAD"]),
        git(root, &["log", "-1", "--pretty=%s"]),
    )
}
