// src/lib.rs

pub mod assets;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod i18n;
pub mod logging;
pub mod manifest;
pub mod status;
pub mod style;
pub mod typecheck;
pub mod types;
pub mod watch;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_or_default;
use crate::context::{BuildSettings, Paths, Toolchain};
use crate::engine::{BuildEvent, EngineCore, Runtime, Session};
use crate::fs::{FileSystem, RealFileSystem};
use crate::watch::Watcher;
use crate::workspace::PackageGraph;

/// High-level entry point used by `main.rs`. Returns the exit code.
///
/// This wires together:
/// - config loading and path resolution
/// - the file watcher (live only with `--watch`)
/// - the external tool adapters
/// - the runtime event loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let root = match &args.root {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir().context("resolving the working directory")?,
    };
    let cfg = load_or_default(root.join(&args.config))?;
    let paths = Paths::resolve(&root, &cfg.paths);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    if args.dry_run {
        print_dry_run(fs.as_ref(), &paths.ui_dir, &args.packages)?;
        return Ok(0);
    }

    let settings = BuildSettings::from_args(&args, &cfg);
    let (tx, rx) = mpsc::unbounded_channel::<BuildEvent>();
    let watcher = Watcher::new(fs, settings.watch, Some(tx.clone()))?;

    // Ctrl-C -> graceful shutdown.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(BuildEvent::ShutdownRequested);
        });
    }

    info!(root = %root.display(), watch = settings.watch, prod = settings.prod, "uibuild starting");
    let session = Session {
        paths,
        tools: Toolchain::from_config(&root, &cfg),
        settings,
        requested: args.packages.clone(),
        watcher,
        events: tx,
    };
    let core = EngineCore::new(session.settings.watch);
    Runtime::new(core, rx, session).run().await
}

/// Print every package with its workspace dependencies, then the build
/// order of the requested packages.
fn print_dry_run(fs: &dyn FileSystem, ui_dir: &Path, requested: &[String]) -> Result<()> {
    let graph = PackageGraph::discover(fs, ui_dir)?;
    let building = graph.building_set(requested)?;

    println!("uibuild dry-run");
    println!("packages ({}):", graph.len());
    for pkg in graph.packages() {
        println!("  - {}", pkg.name);
        let deps = graph.workspace_deps(&pkg.name);
        if !deps.is_empty() {
            println!("      deps: {:?}", deps);
        }
        let modules: Vec<&str> = pkg.modules().collect();
        if !modules.is_empty() {
            println!("      bundle: {:?}", modules);
        }
        if !pkg.hash.is_empty() {
            println!("      hash: {} entries", pkg.hash.len());
        }
        if !pkg.sync.is_empty() {
            println!("      sync: {} entries", pkg.sync.len());
        }
    }
    println!();
    println!("build order:");
    for (i, pkg) in building.iter().enumerate() {
        println!("  {}. {}", i + 1, pkg.name);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
