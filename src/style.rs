// src/style.rs

//! Style-sheet stage: compile every package's `css/build/*.scss` entry
//! through a [`StyleCompiler`] and publish `<name>.<hash>.css`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, error};

use crate::assets::short_hash;
use crate::context::BuildContext;
use crate::fs::FileSystem;
use crate::manifest::{self, Category, Fragment, FragmentTable};
use crate::types::{BoxFuture, Stage};
use crate::watch::glob::expand_all;
use crate::watch::{build_fn, CwdGlob, Subscription};

/// Style-sheet compiler consumed by the style stage.
pub trait StyleCompiler: Send + Sync {
    /// Compile `src` and return the CSS text.
    fn compile<'a>(&'a self, src: &'a Path, prod: bool) -> BoxFuture<'a, Result<String>>;
}

/// Runs the configured `sass` command, reading CSS from stdout.
#[derive(Debug, Clone)]
pub struct SassCli {
    cwd: PathBuf,
    command: Vec<String>,
}

impl SassCli {
    pub fn new(cwd: &Path, command: Vec<String>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            command,
        }
    }
}

impl StyleCompiler for SassCli {
    fn compile<'a>(&'a self, src: &'a Path, prod: bool) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let Some((program, args)) = self.command.split_first() else {
                bail!("empty sass command");
            };
            let mut cmd = Command::new(program);
            cmd.args(args)
                .arg("--no-source-map")
                .arg(if prod { "--style=compressed" } else { "--style=expanded" })
                .arg(src)
                .current_dir(&self.cwd)
                .stdin(Stdio::null())
                .kill_on_drop(true);
            let out = cmd
                .output()
                .await
                .with_context(|| format!("spawning {program}"))?;
            if !out.status.success() {
                bail!("{}", String::from_utf8_lossy(&out.stderr).trim());
            }
            String::from_utf8(out.stdout).context("sass output is not UTF-8")
        })
    }
}

/// Style entry points of the package at `pkg_root`, partials excluded.
pub fn style_sources(fs: &dyn FileSystem, pkg_root: &Path) -> Vec<PathBuf> {
    let Ok(glob) = CwdGlob::new(pkg_root, "css/build/*.scss") else {
        return Vec::new();
    };
    expand_all(fs, &[glob])
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('_'))
        })
        .collect()
}

pub async fn style(ctx: Arc<BuildContext>) -> Result<()> {
    if !ctx.begin(Stage::Style, Some(ctx.settings.style)) {
        return Ok(());
    }

    let fs = Arc::clone(ctx.fs());
    let roots: Vec<PathBuf> = ctx.building.iter().map(|p| p.root.clone()).collect();
    let any_sources = tokio::task::spawn_blocking(move || {
        roots.iter().any(|root| !style_sources(fs.as_ref(), root).is_empty())
    })
    .await
    .context("style scan panicked")?;
    if !any_sources {
        debug!("no style sources");
        ctx.done(Stage::Style, 0);
        return Ok(());
    }

    let globs = ctx
        .building
        .iter()
        .map(|p| CwdGlob::new(&p.root, "css/**/*.scss"))
        .collect::<Result<Vec<_>>>()?;
    let task_ctx = Arc::clone(&ctx);
    let sub = Subscription::new(
        globs,
        build_fn(move |_changed, _all| {
            let ctx = Arc::clone(&task_ctx);
            async move { compile_all(&ctx).await }
        }),
    )
    .key("style")
    .debounce(ctx.settings.debounce.style())
    .stage(Stage::Style);
    ctx.watcher.watch(sub).await
}

/// Recompile every style source of the building packages.
///
/// Sources import shared partials, so any edit rebuilds them all.
async fn compile_all(ctx: &Arc<BuildContext>) -> Result<()> {
    ctx.begin(Stage::Style, None);
    let mut table = FragmentTable::new();
    let mut failed = 0;

    for pkg in &ctx.building {
        let fs = Arc::clone(ctx.fs());
        let root = pkg.root.clone();
        let sources = tokio::task::spawn_blocking(move || style_sources(fs.as_ref(), &root))
            .await
            .context("style scan panicked")?;

        for src in sources {
            let name = src
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match ctx.tools.style.compile(&src, ctx.settings.prod).await {
                Ok(css) => {
                    let hash = short_hash(css.as_bytes());
                    let dest = ctx.paths.css_out.join(format!("{name}.{hash}.css"));
                    ctx.fs().write(&dest, css.as_bytes())?;
                    table.insert(name, Fragment::hashed(hash));
                }
                Err(err) => {
                    error!(stage = %Stage::Style, pkg = %pkg.name, file = %src.display(), "{err:#}");
                    failed += 1;
                }
            }
        }
    }

    if failed > 0 {
        ctx.done(Stage::Style, failed);
        bail!("");
    }
    manifest::update(ctx, Category::Css, &table, false);
    ctx.done(Stage::Style, 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn partials_are_not_entry_points() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/ui/site/css/build/site.scss", "");
        fs.add_file("/ws/ui/site/css/build/_vars.scss", "");
        fs.add_file("/ws/ui/site/css/other.scss", "");

        let sources = style_sources(&fs, Path::new("/ws/ui/site"));
        assert_eq!(sources, vec![PathBuf::from("/ws/ui/site/css/build/site.scss")]);
    }
}
