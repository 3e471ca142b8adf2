// src/typecheck/mod.rs

//! Type-check stage.
//!
//! Every building package gets a fast declaration pass and a full
//! diagnostic pass ([`split`]). The configs of each pass are spread over a
//! bounded worker pool ([`schedule`]); the fast pass completes before the
//! full pass starts, so full passes read dependency declarations instead
//! of waiting on dependency diagnostics.

pub mod join;
pub mod schedule;
pub mod split;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::context::BuildContext;
use crate::errors::BuildError;
use crate::types::{PassKind, Stage};
use crate::watch::path_utils::relative_str;

use join::{JoinUpdate, PassJoin};
use split::{split_config, SplitConfig, SplitOptions};
use worker::{Diagnostic, WorkerEvent, WorkerJob};

pub async fn typecheck(ctx: Arc<BuildContext>) -> Result<()> {
    if !ctx.begin(Stage::TypeCheck, Some(ctx.settings.typecheck)) {
        return Ok(());
    }
    let generation = ctx.workers.generation();

    let task_ctx = Arc::clone(&ctx);
    let configs = tokio::task::spawn_blocking(move || derive_configs(&task_ctx))
        .await
        .context("config split panicked")??;

    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    let (fast_workers, full_workers) = schedule::pool_sizes(cores, &ctx.settings.pools);
    let (fast, full): (Vec<SplitConfig>, Vec<SplitConfig>) =
        configs.into_iter().partition(|c| c.kind == PassKind::Fast);
    let fast = schedule::assign_buckets(fast, fast_workers);
    let full = schedule::assign_buckets(full, full_workers);

    info!(stage = %Stage::TypeCheck, "Typing noCheck ({} workers)", fast.len());
    let Some(fast_ok) = run_pass(&ctx, generation, PassKind::Fast, fast).await? else {
        debug!(stage = %Stage::TypeCheck, "stopped during the fast pass");
        return Ok(());
    };

    info!(stage = %Stage::TypeCheck, "Typechecking noEmit ({} workers)", full.len());
    let Some(full_ok) = run_pass(&ctx, generation, PassKind::Full, full).await? else {
        return Ok(());
    };

    if fast_ok && full_ok {
        ctx.done(Stage::TypeCheck, 0);
    }
    Ok(())
}

/// Split the `tsconfig.json` of every building package, in path order.
fn derive_configs(ctx: &BuildContext) -> Result<Vec<SplitConfig>> {
    let fs = ctx.fs().as_ref();
    for kind in [PassKind::Fast, PassKind::Full] {
        fs.create_dir_all(&ctx.paths.build_temp.join(kind.dir_name()))?;
    }

    let mut sources: Vec<(PathBuf, &str)> = ctx
        .building
        .iter()
        .map(|pkg| (pkg.root.join("tsconfig.json"), pkg.name.as_str()))
        .filter(|(path, _)| fs.is_file(path))
        .collect();
    sources.sort();

    let mut configs = Vec::new();
    for (path, name) in sources {
        let opts = SplitOptions {
            pkg_name: name,
            workspace_deps: ctx.graph.workspace_deps(name),
            build_temp: &ctx.paths.build_temp,
            test: ctx.settings.test,
        };
        configs.extend(split_config(fs, &path, &opts)?);
    }
    Ok(configs)
}

/// Start one worker per non-empty bucket and wait for the pass.
///
/// Returns `Some(true)` once every worker reported `ok`. In one-shot mode
/// it also returns `Some(false)` once every worker settled with an error.
/// `None` means the workers were stopped since `generation` was taken.
/// In watch mode the workers and their message loop keep running after
/// the first result; later recoveries of the full pass mark the stage
/// clean again.
async fn run_pass(
    ctx: &Arc<BuildContext>,
    generation: u64,
    kind: PassKind,
    buckets: Vec<Vec<SplitConfig>>,
) -> Result<Option<bool>> {
    if ctx.workers.generation() != generation {
        return Ok(None);
    }
    let buckets: Vec<Vec<SplitConfig>> = buckets.into_iter().filter(|b| !b.is_empty()).collect();
    if buckets.is_empty() {
        return Ok(Some(true));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let workers = buckets.len();
    for (index, bucket) in buckets.into_iter().enumerate() {
        let job = WorkerJob {
            index,
            kind,
            projects: bucket.into_iter().map(|c| c.config_file).collect(),
            watch: ctx.settings.watch,
        };
        ctx.workers.add(ctx.tools.workers.spawn(job, tx.clone())?);
    }
    drop(tx);

    let (result_tx, result_rx) = oneshot::channel();
    let join = PassJoin::new(workers, ctx.settings.watch);
    ctx.workers
        .add(tokio::spawn(consume(Arc::clone(ctx), kind, join, rx, result_tx)));

    // A dropped sender means the pass was stopped.
    Ok(result_rx.await.ok())
}

async fn consume(
    ctx: Arc<BuildContext>,
    kind: PassKind,
    mut join: PassJoin,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    result_tx: oneshot::Sender<bool>,
) {
    let mut result_tx = Some(result_tx);
    let watch = ctx.settings.watch;

    while let Some(event) = rx.recv().await {
        let msg = match event {
            WorkerEvent::Message(msg) => msg,
            WorkerEvent::Crashed { index, message } => {
                let err = BuildError::WorkerCrashed { index, message };
                ctx.fatal(Some(Stage::TypeCheck), err.to_string());
                return;
            }
        };

        match join.observe(&msg) {
            JoinUpdate::Failed(diag) => {
                report(&ctx, &diag);
                ctx.done(Stage::TypeCheck, diag.code);
            }
            JoinUpdate::AllOk => match result_tx.take() {
                Some(tx) => {
                    let _ = tx.send(true);
                }
                None if kind == PassKind::Full => ctx.done(Stage::TypeCheck, 0),
                None => {}
            },
            JoinUpdate::Waiting | JoinUpdate::Ignored => {}
        }

        if !watch && join.all_settled() {
            if let Some(tx) = result_tx.take() {
                let _ = tx.send(join.all_ok());
            }
        }
    }

    if let Some(tx) = result_tx.take() {
        let _ = tx.send(!watch && join.all_ok());
    }
}

fn report(ctx: &BuildContext, diag: &Diagnostic) {
    let location = diag.file.as_deref().map(|file| {
        let file = relative_str(&ctx.paths.ui_dir, std::path::Path::new(file))
            .unwrap_or_else(|| file.to_string());
        match (diag.line, diag.col) {
            (Some(line), Some(col)) => format!("in '{file}:{}:{}' - ", line + 1, col + 1),
            _ => format!("in '{file}' - "),
        }
    });
    error!(
        stage = %Stage::TypeCheck,
        code = diag.code,
        "ts{} {}{}",
        diag.code,
        location.unwrap_or_default(),
        diag.text
    );
}
