// src/engine/driver.rs

//! Starts the stage pipelines of one build context.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::assets::hash::hash;
use crate::assets::sync::sync;
use crate::bundle::bundle;
use crate::context::{BuildContext, BuildSettings, Paths, Toolchain};
use crate::engine::{monitor, BuildEvent};
use crate::i18n::i18n;
use crate::style::style;
use crate::typecheck::typecheck;
use crate::types::Stage;
use crate::watch::Watcher;
use crate::workspace::PackageGraph;

/// Everything a build is derived from; [`Session::create_context`] turns
/// it into a fresh [`BuildContext`].
#[derive(Clone, Debug)]
pub struct Session {
    pub paths: Paths,
    pub settings: BuildSettings,
    /// Package names from the command line; empty builds everything.
    pub requested: Vec<String>,
    pub watcher: Watcher,
    pub tools: Toolchain,
    pub events: mpsc::UnboundedSender<BuildEvent>,
}

impl Session {
    /// Discover the workspace and create the context for one build.
    ///
    /// Unknown requested packages, malformed declarations and dependency
    /// cycles fail here, before any stage starts.
    pub fn create_context(&self) -> Result<Arc<BuildContext>> {
        let fs = self.watcher.fs();
        let graph = PackageGraph::discover(fs.as_ref(), &self.paths.ui_dir)?;
        let building = graph.building_set(&self.requested)?;

        let names: Vec<&str> = building.iter().map(|p| p.name.as_str()).collect();
        info!("Building {}", names.join(", "));

        Ok(BuildContext::new(
            self.paths.clone(),
            self.settings.clone(),
            graph,
            building,
            self.watcher.clone(),
            self.tools.clone(),
            self.events.clone(),
        ))
    }
}

/// Remove the build-temp and output directories.
pub fn clean(ctx: &BuildContext) -> Result<()> {
    let fs = ctx.fs();
    for dir in ctx.paths.output_dirs() {
        debug!(dir = %dir.display(), "removing");
        fs.remove_dir_all(dir)?;
    }
    Ok(())
}

fn prepare_outputs(ctx: &BuildContext) -> Result<()> {
    if ctx.settings.clean {
        clean(ctx)?;
    }
    let fs = ctx.fs();
    for dir in ctx.paths.output_dirs() {
        fs.create_dir_all(dir)?;
    }
    Ok(())
}

/// Run every stage's initial pass, install the monitor in watch mode, then
/// report [`BuildEvent::BuildFinished`].
///
/// Set-up failures of a stage are fatal; build failures are reported
/// through stage status by the stages themselves.
pub async fn build(ctx: Arc<BuildContext>) {
    let prepared = {
        let ctx = Arc::clone(&ctx);
        tokio::task::spawn_blocking(move || prepare_outputs(&ctx)).await
    };
    match prepared {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return ctx.fatal(None, format!("{err:#}")),
        Err(err) => return ctx.fatal(None, format!("output preparation panicked: {err}")),
    }

    let (assets, styles, compiled, bundled) = tokio::join!(
        async {
            sync(Arc::clone(&ctx)).await?;
            hash(Arc::clone(&ctx)).await
        },
        style(Arc::clone(&ctx)),
        async {
            i18n(Arc::clone(&ctx)).await.map_err(|e| (Stage::I18n, e))?;
            typecheck(Arc::clone(&ctx))
                .await
                .map_err(|e| (Stage::TypeCheck, e))
        },
        bundle(Arc::clone(&ctx)),
    );

    let mut failed = false;
    for (stage, result) in [
        (Stage::Sync, assets),
        (Stage::Style, styles),
        (Stage::Bundle, bundled),
    ] {
        if let Err(err) = result {
            ctx.fatal(Some(stage), format!("{err:#}"));
            failed = true;
        }
    }
    if let Err((stage, err)) = compiled {
        ctx.fatal(Some(stage), format!("{err:#}"));
        failed = true;
    }
    if failed {
        return;
    }

    if ctx.settings.watch {
        if let Err(err) = monitor::install(&ctx).await {
            return ctx.fatal(None, format!("{err:#}"));
        }
    }
    ctx.send(BuildEvent::BuildFinished);
}

/// Rerun type-check and bundle after shared declarations changed.
pub async fn restart_compilers(ctx: Arc<BuildContext>) {
    crate::manifest::stop(&ctx);
    ctx.workers.stop_all().await;
    crate::bundle::stop(&ctx).await;
    ctx.reset_stages(&[Stage::TypeCheck, Stage::Bundle]);

    let (compiled, bundled) = tokio::join!(
        typecheck(Arc::clone(&ctx)),
        bundle(Arc::clone(&ctx))
    );
    for (stage, result) in [(Stage::TypeCheck, compiled), (Stage::Bundle, bundled)] {
        if let Err(err) = result {
            ctx.fatal(Some(stage), format!("{err:#}"));
        }
    }
}
