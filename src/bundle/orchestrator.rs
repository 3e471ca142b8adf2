// src/bundle/orchestrator.rs

//! Bundle stage.
//!
//! Three subscriptions drive the bundler:
//! - `bundle` reacts to the entry-point set changing and creates a fresh
//!   bundle context over it;
//! - `bundle-inputs` (watch mode) follows every source of the last build
//!   and rebuilds the live context when one is edited;
//! - `inline` compiles inline sources to text for the manifest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use anyhow::{bail, Result};
use tracing::{debug, error, info, warn};

use crate::bundle::plugin::HtmlCompaction;
use crate::bundle::{BuildResult, BundleContext, BundleMessage, BundleOptions, BundlePlugin, Metafile};
use crate::context::BuildContext;
use crate::manifest::{self, Category, Fragment, FragmentTable};
use crate::types::Stage;
use crate::watch::path_utils::file_name_str;
use crate::watch::{build_fn, CwdGlob, Subscription};
use crate::workspace::BundleEntry;

const ENTRIES_KEY: &str = "bundle";
const INPUTS_KEY: &str = "bundle-inputs";
const INLINE_KEY: &str = "inline";

const METAFILE: &str = "bundle.meta.json";

pub async fn bundle(ctx: Arc<BuildContext>) -> Result<()> {
    if !ctx.begin(Stage::Bundle, None) {
        return Ok(());
    }

    let mut modules = Vec::new();
    let mut inlines = Vec::new();
    let mut inline_names = HashMap::new();
    for pkg in &ctx.building {
        for module in pkg.modules() {
            modules.push(CwdGlob::new(&pkg.root, module)?);
        }
        for entry in &pkg.bundle {
            if let Some(inline) = &entry.inline {
                inlines.push(CwdGlob::new(&pkg.root, inline)?);
                inline_names.insert(pkg.root.join(inline), inline_name(entry));
            }
        }
    }

    let mut subs = Vec::new();
    if modules.is_empty() {
        debug!("no bundle entry points");
        ctx.done(Stage::Bundle, 0);
    } else {
        subs.push(entries_subscription(&ctx, modules));
    }
    if !inlines.is_empty() {
        subs.push(inline_subscription(&ctx, inlines, inline_names));
    }
    ctx.watcher.watch_all(subs).await
}

/// Stop the bundle subscriptions and dispose the live context.
///
/// An in-flight rebuild is not waited for; it disposes its own context
/// once it sees the new epoch.
pub async fn stop(ctx: &BuildContext) {
    for key in [ENTRIES_KEY, INPUTS_KEY, INLINE_KEY] {
        ctx.watcher.stop(key);
    }
    if let Some(live) = ctx.bundle.close() {
        live.dispose().await;
    }
}

/// Manifest name of an inline source: the module's file stem when the
/// entry also has a module, otherwise the inline file minus `.inline.ts`.
pub fn inline_name(entry: &BundleEntry) -> String {
    match (&entry.module, &entry.inline) {
        (Some(module), _) => strip(&file_name_str(Path::new(module)), ".ts"),
        (None, Some(inline)) => strip(&file_name_str(Path::new(inline)), ".inline.ts"),
        (None, None) => String::new(),
    }
}

fn strip(name: &str, suffix: &str) -> String {
    name.strip_suffix(suffix).unwrap_or(name).to_string()
}

fn entries_subscription(ctx: &Arc<BuildContext>, modules: Vec<CwdGlob>) -> Subscription {
    let task_ctx = Arc::clone(ctx);
    Subscription::new(
        modules,
        build_fn(move |_changed, all| {
            let ctx = Arc::clone(&task_ctx);
            async move { rebuild_entries(&ctx, all).await }
        }),
    )
    .key(ENTRIES_KEY)
    .no_touch()
    .debounce(ctx.settings.debounce.bundle())
    .stage(Stage::Bundle)
}

fn inputs_subscription(ctx: &Arc<BuildContext>, meta: &Metafile) -> Subscription {
    let globs = meta
        .source_inputs()
        .filter_map(|input| match CwdGlob::new(&ctx.paths.root, input) {
            Ok(glob) => Some(glob),
            Err(err) => {
                debug!("not watching {input}: {err:#}");
                None
            }
        })
        .collect();
    let task_ctx = Arc::clone(ctx);
    Subscription::new(
        globs,
        build_fn(move |_changed, _all| {
            let ctx = Arc::clone(&task_ctx);
            async move { rebuild_live(&ctx).await }
        }),
    )
    .key(INPUTS_KEY)
    .no_initial()
    .debounce(ctx.settings.debounce.bundle())
    .stage(Stage::Bundle)
}

fn inline_subscription(
    ctx: &Arc<BuildContext>,
    globs: Vec<CwdGlob>,
    names: HashMap<PathBuf, String>,
) -> Subscription {
    let task_ctx = Arc::clone(ctx);
    let names = Arc::new(names);
    Subscription::new(
        globs,
        build_fn(move |_changed, all| {
            let ctx = Arc::clone(&task_ctx);
            let names = Arc::clone(&names);
            async move { compile_inlines(&ctx, all, &names).await }
        }),
    )
    .key(INLINE_KEY)
    .debounce(ctx.settings.debounce.bundle())
    .stage(Stage::Bundle)
}

/// Replace the live context with one over `entries` and build it.
async fn rebuild_entries(ctx: &Arc<BuildContext>, mut entries: Vec<PathBuf>) -> Result<()> {
    let _building = ctx.bundle.building.lock().await;
    let epoch = ctx.bundle.epoch();
    if let Some(previous) = ctx.bundle.take() {
        previous.dispose().await;
    }
    ctx.begin(Stage::Bundle, None);
    entries.sort();
    info!(stage = %Stage::Bundle, "Bundling {} entry points", entries.len());

    let options = BundleOptions {
        entry_points: entries,
        outdir: ctx.paths.js_out.clone(),
        metafile: ctx.paths.build_temp.join(METAFILE),
        prod: ctx.settings.prod,
    };
    let plugins: Vec<Arc<dyn BundlePlugin>> = vec![
        Arc::new(HtmlCompaction),
        Arc::new(ManifestUpdate {
            ctx: Arc::downgrade(ctx),
            epoch,
        }),
    ];
    match ctx.tools.bundler.context(options, plugins).await {
        Ok(bundle) => build(ctx, epoch, bundle).await,
        Err(err) => {
            error!(stage = %Stage::Bundle, "{err:#}");
            ctx.done(Stage::Bundle, -1);
            Ok(())
        }
    }
}

/// Rebuild the live context after one of its sources changed.
async fn rebuild_live(ctx: &Arc<BuildContext>) -> Result<()> {
    let _building = ctx.bundle.building.lock().await;
    let epoch = ctx.bundle.epoch();
    let Some(bundle) = ctx.bundle.take() else {
        return Ok(());
    };
    ctx.begin(Stage::Bundle, None);
    build(ctx, epoch, bundle).await
}

/// Build `bundle`, then keep it live (watch mode) or dispose it.
///
/// Successful watch-mode builds re-register `bundle-inputs` over the
/// sources they read. Stage status is reported by the end hook.
async fn build(ctx: &Arc<BuildContext>, epoch: u64, mut bundle: Box<dyn BundleContext>) -> Result<()> {
    let result = bundle.rebuild().await;
    if ctx.bundle.epoch() != epoch {
        bundle.dispose().await;
        return Ok(());
    }

    match result {
        Ok(result) => {
            if ctx.settings.watch {
                if let Some(meta) = &result.metafile {
                    ctx.watcher.watch(inputs_subscription(ctx, meta)).await?;
                }
            }
        }
        Err(err) => {
            error!(stage = %Stage::Bundle, "{err:#}");
            ctx.done(Stage::Bundle, -1);
        }
    }

    if !ctx.settings.watch {
        bundle.dispose().await;
    } else if let Some(stale) = ctx.bundle.put(bundle, epoch) {
        stale.dispose().await;
    }
    Ok(())
}

/// End hook: report the build and merge its outputs into the manifest.
struct ManifestUpdate {
    ctx: Weak<BuildContext>,
    epoch: u64,
}

impl BundlePlugin for ManifestUpdate {
    fn name(&self) -> &'static str {
        "onBundleDone"
    }

    fn on_end(&self, result: &BuildResult) {
        let Some(ctx) = self.ctx.upgrade() else {
            return;
        };
        if ctx.bundle.epoch() != self.epoch {
            return;
        }
        log_messages(&result.errors, true);
        log_messages(&result.warnings, false);
        let errors = i32::try_from(result.errors.len()).unwrap_or(i32::MAX);

        if errors == 0 {
            if let Some(meta) = &result.metafile {
                let table = meta.fragments(&ctx.paths.root, &ctx.paths.js_out);
                manifest::update(&ctx, Category::Js, &table, true);
            }
        }
        ctx.done(Stage::Bundle, errors);
    }
}

/// Minify every inline source into the `js` table.
async fn compile_inlines(
    ctx: &Arc<BuildContext>,
    files: Vec<PathBuf>,
    names: &HashMap<PathBuf, String>,
) -> Result<()> {
    let mut table = FragmentTable::new();
    for file in files {
        let name = names
            .get(&file)
            .cloned()
            .unwrap_or_else(|| strip(&file_name_str(&file), ".inline.ts"));
        let source = ctx.fs().read_to_string(&file)?;
        let out = ctx.tools.bundler.transform(&file, &source).await?;
        log_messages(&out.warnings, false);
        if !out.errors.is_empty() {
            log_messages(&out.errors, true);
            bail!("");
        }
        table.insert(
            name,
            Fragment {
                inline: Some(out.code),
                ..Fragment::default()
            },
        );
    }
    manifest::update(ctx, Category::Js, &table, true);
    Ok(())
}

fn log_messages(messages: &[BundleMessage], is_error: bool) {
    for msg in messages {
        let at = msg
            .location
            .as_ref()
            .map(|loc| {
                let mut at = format!(" in '{}:{}:{}'", loc.file, loc.line, loc.column);
                if !loc.line_text.is_empty() {
                    at.push_str(&format!(": {}", loc.line_text.trim()));
                }
                at
            })
            .unwrap_or_default();
        if is_error {
            error!(stage = %Stage::Bundle, "{}{}", msg.text, at);
        } else {
            warn!(stage = %Stage::Bundle, "{}{}", msg.text, at);
        }
    }
}
