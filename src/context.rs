// src/context.rs

//! The explicit, owned state of one build: resolved paths, settings, the
//! package graph, stage status, the watcher and the manifest tables.
//!
//! One `BuildContext` lives from package discovery until a full restart (or
//! process exit). Every pipeline receives it as `Arc<BuildContext>`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bundle::{BundleSlot, Bundler, EsbuildCli};
use crate::cli::CliArgs;
use crate::config::model::{ConfigFile, DebounceSection, PathsSection, TypecheckSection};
use crate::engine::BuildEvent;
use crate::fs::FileSystem;
use crate::manifest::ManifestTables;
use crate::status::{StageStatus, StatusRegistry};
use crate::style::{SassCli, StyleCompiler};
use crate::typecheck::worker::{ProcessWorkerBackend, WorkerBackend, WorkerSet};
use crate::types::Stage;
use crate::watch::Watcher;
use crate::workspace::{Package, PackageGraph};

/// Absolute locations every pipeline reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub ui_dir: PathBuf,
    /// Shared ambient type declarations (`<ui>/@types`).
    pub types_dir: PathBuf,
    pub out_dir: PathBuf,
    pub js_out: PathBuf,
    pub css_out: PathBuf,
    pub hashed_out: PathBuf,
    pub build_temp: PathBuf,
    /// Compiled locale scripts, relative to `root`.
    pub i18n_glob: String,
}

impl Paths {
    pub fn resolve(root: &Path, cfg: &PathsSection) -> Self {
        let out_dir = root.join(&cfg.out_dir);
        let ui_dir = root.join(&cfg.ui_dir);
        Self {
            root: root.to_path_buf(),
            types_dir: ui_dir.join("@types"),
            ui_dir,
            js_out: out_dir.join(&cfg.js_out),
            css_out: out_dir.join(&cfg.css_out),
            hashed_out: out_dir.join(&cfg.hashed_out),
            out_dir,
            build_temp: root.join(&cfg.build_temp),
            i18n_glob: cfg.i18n_glob.clone(),
        }
    }

    /// Server-readable manifest for the current mode.
    pub fn manifest_file(&self, prod: bool) -> PathBuf {
        self.js_out
            .join(format!("manifest.{}.json", if prod { "prod" } else { "dev" }))
    }

    /// Directories created before any stage runs.
    pub fn output_dirs(&self) -> [&Path; 4] {
        [&self.js_out, &self.css_out, &self.hashed_out, &self.build_temp]
    }
}

/// Run-wide switches from the CLI and the config file.
#[derive(Debug, Clone, Default)]
pub struct BuildSettings {
    pub watch: bool,
    pub prod: bool,
    pub debug: bool,
    pub test: bool,
    pub clean: bool,
    pub typecheck: bool,
    pub style: bool,
    pub remote_log: Option<String>,
    pub debounce: DebounceSection,
    pub pools: TypecheckSection,
}

impl BuildSettings {
    pub fn from_args(args: &CliArgs, cfg: &ConfigFile) -> Self {
        Self {
            watch: args.watch,
            prod: args.prod,
            debug: args.debug,
            test: args.test,
            clean: args.clean,
            typecheck: !args.no_typecheck,
            style: !args.no_style,
            remote_log: args.remote_log.clone(),
            debounce: cfg.debounce,
            pools: cfg.typecheck,
        }
    }

    /// Suffix for stage outcome lines.
    fn watching(&self) -> &'static str {
        if self.watch { " - Watching..." } else { "" }
    }
}

/// The external engines, behind their traits.
#[derive(Clone)]
pub struct Toolchain {
    pub bundler: Arc<dyn Bundler>,
    pub workers: Arc<dyn WorkerBackend>,
    pub style: Arc<dyn StyleCompiler>,
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}

impl Toolchain {
    /// Real command-line adapters configured by `[tools]`.
    pub fn from_config(root: &Path, cfg: &ConfigFile) -> Self {
        Self {
            bundler: Arc::new(EsbuildCli::new(
                root,
                cfg.tools.esbuild.clone(),
                cfg.tools.bundle_host.clone(),
            )),
            workers: Arc::new(ProcessWorkerBackend::new(
                root,
                cfg.tools.typecheck_worker.clone(),
            )),
            style: Arc::new(SassCli::new(root, cfg.tools.sass.clone())),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BuildContext {
    pub paths: Paths,
    pub settings: BuildSettings,
    pub graph: PackageGraph,
    /// Packages being built, dependencies first.
    pub building: Vec<Package>,
    pub watcher: Watcher,
    pub tools: Toolchain,
    events: mpsc::UnboundedSender<BuildEvent>,
    status: Mutex<StatusRegistry>,
    pub(crate) manifest: Mutex<ManifestTables>,
    pub(crate) manifest_timer: Mutex<Option<JoinHandle<()>>>,
    /// Serializes manifest writes.
    pub(crate) publishing: tokio::sync::Mutex<()>,
    pub(crate) workers: WorkerSet,
    pub(crate) bundle: BundleSlot,
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("paths", &self.paths)
            .field("settings", &self.settings)
            .field(
                "building",
                &self.building.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl BuildContext {
    pub fn new(
        paths: Paths,
        settings: BuildSettings,
        graph: PackageGraph,
        building: Vec<Package>,
        watcher: Watcher,
        tools: Toolchain,
        events: mpsc::UnboundedSender<BuildEvent>,
    ) -> Arc<Self> {
        let status = StatusRegistry::new(graph.len(), building.len());
        Arc::new(Self {
            paths,
            settings,
            graph,
            building,
            watcher,
            tools,
            events,
            status: Mutex::new(status),
            manifest: Mutex::new(ManifestTables::new()),
            manifest_timer: Mutex::new(None),
            publishing: tokio::sync::Mutex::new(()),
            workers: WorkerSet::default(),
            bundle: BundleSlot::default(),
        })
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        self.watcher.fs()
    }

    pub fn send(&self, event: BuildEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("build event dropped; runtime has exited");
        }
    }

    /// Report an unrecoverable failure; the runtime stops everything and
    /// exits non-zero.
    pub fn fatal(&self, stage: Option<Stage>, message: impl Into<String>) {
        self.send(BuildEvent::Fatal {
            stage,
            message: message.into(),
        });
    }

    /// See [`StatusRegistry::begin`].
    pub fn begin(&self, stage: Stage, enable: Option<bool>) -> bool {
        lock(&self.status).begin(stage, enable)
    }

    /// Record a stage outcome.
    ///
    /// Logs on transitions, re-checks quiescence, and outside watch mode
    /// turns a non-zero code into a process exit.
    pub fn done(self: &Arc<Self>, stage: Stage, code: i32) {
        let changed = lock(&self.status).done(stage, code);
        if changed {
            if code == 0 {
                info!(stage = %stage, "Done{}", self.settings.watching());
            } else {
                error!(stage = %stage, code, "Failed{}", self.settings.watching());
            }
        }
        self.check_quiescence();
        if !self.settings.watch && code != 0 {
            self.send(BuildEvent::Exit(code));
        }
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        lock(&self.status).get(stage)
    }

    pub fn builders_ok(&self) -> bool {
        lock(&self.status).builders_ok()
    }

    /// Every stage is clean and every watch subscription settled.
    pub fn is_quiescent(&self) -> bool {
        self.builders_ok() && self.watcher.watch_ok()
    }

    /// When quiescent, log the build time (once per start) and ask the
    /// manifest to publish pending changes.
    pub fn check_quiescence(self: &Arc<Self>) {
        if !self.is_quiescent() {
            return;
        }
        if let Some(elapsed) = lock(&self.status).take_elapsed() {
            info!("Done in {:.2}s", elapsed.as_secs_f64());
        }
        crate::manifest::request_publish(self);
    }

    /// Forget the outcome of `stages` before restarting them.
    pub fn reset_stages(&self, stages: &[Stage]) {
        lock(&self.status).reset_stages(stages);
    }

    /// Stop every pipeline of this context.
    ///
    /// Subscriptions are cancelled, type-check workers killed, the bundle
    /// context disposed and the manifest timer cancelled.
    pub async fn stop(&self) {
        self.watcher.stop_all();
        crate::manifest::stop(self);
        self.workers.stop_all().await;
        crate::bundle::stop(self).await;
    }
}
