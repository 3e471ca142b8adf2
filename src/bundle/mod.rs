// src/bundle/mod.rs

//! Bundler integration.
//!
//! The bundler itself is an external service behind [`Bundler`]; it hands
//! out a [`BundleContext`] per entry-point set that can be rebuilt
//! incrementally. [`orchestrator`] drives it from watch subscriptions,
//! [`plugin`] holds the load/end hooks and [`metafile`] turns build
//! metadata into manifest fragments. [`esbuild`] is the production
//! bundler, served by a [`host`] process.

pub mod esbuild;
pub mod host;
pub mod metafile;
pub mod orchestrator;
pub mod plugin;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::context::lock;
use crate::types::BoxFuture;

pub use esbuild::EsbuildCli;
pub use metafile::Metafile;
pub use orchestrator::{bundle, stop};
pub use plugin::BundlePlugin;

/// Options of one bundle context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOptions {
    /// Sorted absolute entry points.
    pub entry_points: Vec<PathBuf>,
    pub outdir: PathBuf,
    /// Where the build metadata is written.
    pub metafile: PathBuf,
    /// Minify instead of emitting source maps.
    pub prod: bool,
}

/// Source position of a bundler message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub line_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMessage {
    pub text: String,
    pub location: Option<Location>,
}

impl BundleMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }
}

/// Outcome of one (re)build.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub errors: Vec<BundleMessage>,
    pub warnings: Vec<BundleMessage>,
    /// Present on success.
    pub metafile: Option<Metafile>,
}

/// Outcome of compiling one source to text.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub code: String,
    pub errors: Vec<BundleMessage>,
    pub warnings: Vec<BundleMessage>,
}

/// A live build of one entry-point set.
pub trait BundleContext: Send {
    /// Rebuild, run the plugins' end hooks and return the result.
    fn rebuild(&mut self) -> BoxFuture<'_, Result<BuildResult>>;

    /// Release the context's resources.
    fn dispose(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// The module bundler consumed by the bundle stage.
pub trait Bundler: Send + Sync {
    fn context(
        &self,
        options: BundleOptions,
        plugins: Vec<Arc<dyn BundlePlugin>>,
    ) -> BoxFuture<'_, Result<Box<dyn BundleContext>>>;

    /// Minify `source` (a TypeScript file at `path`) to a script string.
    fn transform<'a>(&'a self, path: &'a Path, source: &'a str) -> BoxFuture<'a, Result<TransformOutput>>;
}

/// Holder of the live bundle context of a build.
///
/// A rebuild takes the context out of the slot and puts it back when done,
/// so `live` is only locked briefly. The epoch advances on every [`stop`];
/// builds that started in an older epoch discard their results.
#[derive(Default)]
pub struct BundleSlot {
    live: Mutex<Option<Box<dyn BundleContext>>>,
    /// Serializes rebuilds; never held by [`stop`].
    building: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
}

impl BundleSlot {
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn take(&self) -> Option<Box<dyn BundleContext>> {
        lock(&self.live).take()
    }

    /// Keep `bundle` live unless the slot was stopped since `epoch`; a
    /// rejected context is handed back for disposal.
    fn put(&self, bundle: Box<dyn BundleContext>, epoch: u64) -> Option<Box<dyn BundleContext>> {
        let mut live = lock(&self.live);
        if self.epoch() != epoch {
            return Some(bundle);
        }
        *live = Some(bundle);
        None
    }

    /// Start a new epoch and take the live context.
    fn close(&self) -> Option<Box<dyn BundleContext>> {
        let mut live = lock(&self.live);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        live.take()
    }
}
