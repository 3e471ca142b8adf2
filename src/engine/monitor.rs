// src/engine/monitor.rs

//! Watch-mode monitor over the files that invalidate more than one stage.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::context::BuildContext;
use crate::engine::BuildEvent;
use crate::watch::path_utils::file_name_str;
use crate::watch::{build_fn, CwdGlob, Subscription};

const KEY: &str = "monitor";

/// Register the `monitor` subscription.
///
/// It never builds; a change only sends the matching event.
pub async fn install(ctx: &Arc<BuildContext>) -> Result<()> {
    let ui = &ctx.paths.ui_dir;
    let globs = vec![
        CwdGlob::new(&ctx.paths.root, "package.json")?,
        CwdGlob::new(ui, "*/package.json")?,
        CwdGlob::new(ui, "*/tsconfig.json")?,
        CwdGlob::new(ui, "@types/*/package.json")?,
        CwdGlob::new(ui, "@types/*/*.d.ts")?,
    ];

    let task_ctx = Arc::clone(ctx);
    let sub = Subscription::new(
        globs,
        build_fn(move |changed: Vec<PathBuf>, _all| {
            let ctx = Arc::clone(&task_ctx);
            async move {
                if let Some(event) = classify(&changed) {
                    info!("{} changed", describe(&changed));
                    if event == BuildEvent::DependenciesChanged {
                        warn!("Exiting due to package.json change");
                    }
                    ctx.send(event);
                }
                Ok(())
            }
        }),
    )
    .key(KEY)
    .no_initial()
    .debounce(ctx.settings.debounce.monitor());
    ctx.watcher.watch(sub).await
}

/// Which event a set of changed files calls for.
///
/// A package declaration ends the watch; shared type declarations and
/// compiler configs only rerun the compilers.
pub fn classify(changed: &[PathBuf]) -> Option<BuildEvent> {
    let names: Vec<String> = changed.iter().map(|p| file_name_str(p)).collect();
    if names.iter().any(|n| n == "package.json") {
        Some(BuildEvent::DependenciesChanged)
    } else if names.iter().any(|n| n.ends_with(".d.ts") || n == "tsconfig.json") {
        Some(BuildEvent::RestartCompilers)
    } else {
        None
    }
}

fn describe(changed: &[PathBuf]) -> String {
    changed
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn paths(list: &[&str]) -> Vec<PathBuf> {
        list.iter().map(|p| Path::new(p).to_path_buf()).collect()
    }

    #[test]
    fn package_declarations_win() {
        let changed = paths(&["/r/ui/@types/x/index.d.ts", "/r/ui/site/package.json"]);
        assert_eq!(classify(&changed), Some(BuildEvent::DependenciesChanged));
    }

    #[test]
    fn declarations_and_configs_restart_compilers() {
        assert_eq!(
            classify(&paths(&["/r/ui/@types/x/index.d.ts"])),
            Some(BuildEvent::RestartCompilers)
        );
        assert_eq!(
            classify(&paths(&["/r/ui/site/tsconfig.json"])),
            Some(BuildEvent::RestartCompilers)
        );
        assert_eq!(classify(&paths(&["/r/ui/site/readme.md"])), None);
    }
}
