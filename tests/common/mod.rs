#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use uibuild::config::model::{ConfigFile, DebounceSection};
use uibuild::context::{BuildSettings, Paths, Toolchain};
use uibuild::engine::{BuildEvent, EngineCore, Runtime, Session};
use uibuild::fs::RealFileSystem;
use uibuild::watch::Watcher;

pub use uibuild_test_utils::workspace::Workspace;
pub use uibuild_test_utils::{
    init_tracing, with_timeout, FakeBundler, FakeStyleCompiler, FakeWorkerBackend,
    WorkspaceBuilder,
};

/// A runtime over a temp workspace with every external tool faked.
pub struct Harness {
    pub runtime: Runtime,
    /// A copy of the runtime's session, for driving stages directly.
    pub session: Session,
    pub events: mpsc::UnboundedSender<BuildEvent>,
    pub bundler: FakeBundler,
    pub workers: FakeWorkerBackend,
}

/// Short debounce windows so watch tests settle quickly.
fn fast_debounce() -> DebounceSection {
    DebounceSection {
        bundle_ms: 50,
        sync_ms: 50,
        hash_ms: 50,
        style_ms: 50,
        monitor_ms: 100,
        manifest_ms: 50,
    }
}

pub fn harness(ws: &Workspace, watch: bool, requested: &[&str]) -> Harness {
    harness_with(
        ws,
        watch,
        requested,
        FakeBundler::new(ws.root()),
        FakeWorkerBackend::new(),
    )
}

pub fn harness_with(
    ws: &Workspace,
    watch: bool,
    requested: &[&str],
    bundler: FakeBundler,
    workers: FakeWorkerBackend,
) -> Harness {
    let cfg = ConfigFile::default();
    let paths = Paths::resolve(ws.root(), &cfg.paths);
    let settings = BuildSettings {
        watch,
        typecheck: true,
        style: true,
        debounce: fast_debounce(),
        pools: cfg.typecheck,
        ..BuildSettings::default()
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher =
        Watcher::new(Arc::new(RealFileSystem), watch, Some(tx.clone())).expect("create watcher");
    let tools = Toolchain {
        bundler: Arc::new(bundler.clone()),
        workers: Arc::new(workers.clone()),
        style: Arc::new(FakeStyleCompiler),
    };

    let session = Session {
        paths,
        settings,
        requested: requested.iter().map(|s| s.to_string()).collect(),
        watcher,
        tools,
        events: tx.clone(),
    };
    Harness {
        runtime: Runtime::new(EngineCore::new(watch), rx, session.clone()),
        session,
        events: tx,
        bundler,
        workers,
    }
}

/// Poll `check` every 50 ms until it yields a value.
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(value) = check() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Name of the published bootstrap script in `public/compiled`, if any.
pub fn bootstrap_scripts(ws: &Workspace) -> Vec<String> {
    ws.list("public/compiled")
        .into_iter()
        .filter(|n| n.starts_with("manifest.") && n.ends_with(".js"))
        .collect()
}

/// The server manifest as JSON.
pub fn server_manifest(ws: &Workspace) -> Option<serde_json::Value> {
    let text = std::fs::read_to_string(ws.path("public/compiled/manifest.dev.json")).ok()?;
    serde_json::from_str(&text).ok()
}

/// Two packages: `base` (no build entries) and `app` depending on it with
/// a bundle module, an inline script, a style sheet, a synced and hashed
/// asset and a locale.
pub fn sample_workspace() -> Workspace {
    WorkspaceBuilder::new()
        .package("base", serde_json::json!({}))
        .tsconfig("base")
        .file("ui/base/src/index.ts", "export const base = 1;")
        .package(
            "app",
            serde_json::json!({
                "dependencies": {"base": "workspace:*"},
                "build": {
                    "bundle": ["src/main.ts", {"inline": "src/boot.inline.ts"}],
                    "hash": "app/logo.svg",
                    "sync": {"static/logo.svg": "public/app"}
                }
            }),
        )
        .tsconfig("app")
        .file(
            "ui/app/src/main.ts",
            "import { base } from 'base';\nconst view = $html`\n  <div>\n    ${base}\n  </div>\n`;\n",
        )
        .file("ui/app/src/boot.inline.ts", "document.body.dataset.boot  =  '1';")
        .file("ui/app/css/build/app.scss", "body { color: red; }")
        .file("ui/app/css/build/_partial.scss", "$x: 1;")
        .file("ui/app/static/logo.svg", "<svg/>")
        .locale("en")
        .build()
}
