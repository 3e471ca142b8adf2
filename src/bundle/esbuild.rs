// src/bundle/esbuild.rs

//! Adapter for `esbuild`.
//!
//! Bundle contexts live in a bundler host process speaking the line
//! protocol of [`crate::bundle::host`], so load hooks rewrite sources
//! before esbuild parses them. One-shot transforms run the `esbuild`
//! command directly and recover messages from its plain-text log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::bundle::host::HostSession;
use crate::bundle::plugin::run_on_end;
use crate::bundle::{
    BuildResult, BundleContext, BundleMessage, BundleOptions, BundlePlugin, Bundler, Location,
    TransformOutput,
};
use crate::types::BoxFuture;

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+):(\d+):(\d+):$").expect("valid regex"));
static SOURCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+ │ (.*)$").expect("valid regex"));

const ERROR_MARK: &str = "✘ [ERROR] ";
const WARNING_MARK: &str = "▲ [WARNING] ";

const HOST_EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EsbuildCli {
    cwd: PathBuf,
    command: Vec<String>,
    host: Vec<String>,
}

impl EsbuildCli {
    /// `command` runs transforms, `host` serves bundle contexts.
    pub fn new(cwd: &Path, command: Vec<String>, host: Vec<String>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            command,
            host,
        }
    }

    fn command(&self) -> Result<Command> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("empty esbuild command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--log-level=warning")
            .arg("--color=false")
            .current_dir(&self.cwd)
            .kill_on_drop(true);
        Ok(cmd)
    }

    fn spawn_host(&self) -> Result<Child> {
        let Some((program, args)) = self.host.split_first() else {
            bail!("empty bundler host command");
        };
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawning bundler host")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("bundler host stderr: {}", line);
                }
            });
        }
        Ok(child)
    }
}

/// Split an `esbuild` log into `(errors, warnings)`.
pub fn parse_log(log: &str) -> (Vec<BundleMessage>, Vec<BundleMessage>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    // (is_error, message) under construction
    let mut current: Option<(bool, BundleMessage)> = None;

    let mut finish = |current: &mut Option<(bool, BundleMessage)>| {
        if let Some((is_error, msg)) = current.take() {
            if is_error { errors.push(msg) } else { warnings.push(msg) }
        }
    };

    for line in log.lines() {
        if let Some(text) = line.strip_prefix(ERROR_MARK) {
            finish(&mut current);
            current = Some((true, BundleMessage::new(text.trim())));
            continue;
        }
        if let Some(text) = line.strip_prefix(WARNING_MARK) {
            finish(&mut current);
            current = Some((false, BundleMessage::new(text.trim())));
            continue;
        }
        let Some((_, msg)) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();
        match &mut msg.location {
            None => {
                if let Some(caps) = LOCATION.captures(trimmed) {
                    msg.location = Some(Location {
                        file: caps[1].to_string(),
                        line: caps[2].parse().unwrap_or(0),
                        column: caps[3].parse().unwrap_or(0),
                        line_text: String::new(),
                    });
                }
            }
            Some(loc) if loc.line_text.is_empty() => {
                if let Some(caps) = SOURCE_LINE.captures(trimmed) {
                    loc.line_text = caps[1].to_string();
                }
            }
            Some(_) => {}
        }
    }
    finish(&mut current);
    (errors, warnings)
}

struct EsbuildContext {
    child: Child,
    session: HostSession<BufReader<ChildStdout>, ChildStdin>,
    plugins: Vec<Arc<dyn BundlePlugin>>,
}

impl BundleContext for EsbuildContext {
    fn rebuild(&mut self) -> BoxFuture<'_, Result<BuildResult>> {
        Box::pin(async move {
            let result = self.session.rebuild(&self.plugins).await?;
            run_on_end(&self.plugins, &result);
            Ok(result)
        })
    }

    fn dispose(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let EsbuildContext {
                mut child,
                mut session,
                ..
            } = *self;
            session.dispose().await;
            drop(session);
            match tokio::time::timeout(HOST_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "bundler host exited"),
                Ok(Err(err)) => debug!("bundler host wait: {err}"),
                Err(_) => {
                    if let Err(err) = child.kill().await {
                        debug!("bundler host kill: {err}");
                    }
                }
            }
        })
    }
}

impl Bundler for EsbuildCli {
    fn context(
        &self,
        options: BundleOptions,
        plugins: Vec<Arc<dyn BundlePlugin>>,
    ) -> BoxFuture<'_, Result<Box<dyn BundleContext>>> {
        Box::pin(async move {
            let mut child = self.spawn_host()?;
            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                bail!("bundler host has no stdio");
            };
            let session = HostSession::open(BufReader::new(stdout), stdin, &options).await?;
            debug!(
                entries = options.entry_points.len(),
                plugins = plugins.len(),
                "bundle context opened"
            );
            let ctx: Box<dyn BundleContext> = Box::new(EsbuildContext {
                child,
                session,
                plugins,
            });
            Ok(ctx)
        })
    }

    fn transform<'a>(&'a self, path: &'a Path, source: &'a str) -> BoxFuture<'a, Result<TransformOutput>> {
        Box::pin(async move {
            let mut cmd = self.command()?;
            cmd.arg("--loader=ts")
                .arg("--minify")
                .arg(format!("--sourcefile={}", path.display()))
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let mut child = cmd.spawn().context("spawning esbuild")?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(source.as_bytes())
                    .await
                    .context("writing esbuild stdin")?;
            }
            let out = child.wait_with_output().await.context("waiting for esbuild")?;
            let (mut errors, warnings) = parse_log(&String::from_utf8_lossy(&out.stderr));
            if !out.status.success() && errors.is_empty() {
                errors.push(BundleMessage::new(format!("esbuild exited with {}", out.status)));
            }
            Ok(TransformOutput {
                code: String::from_utf8(out.stdout).context("esbuild output is not UTF-8")?,
                errors,
                warnings,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
✘ [ERROR] Could not resolve \"missing\"

    ui/site/src/site.ts:3:18:
      3 │ import { x } from \"missing\";
        ╵                   ~~~~~~~~~

  You can mark the path \"missing\" as external to exclude it from the bundle.

▲ [WARNING] Comparison with -0 using the \"===\" operator will also match 0

    ui/lib/src/num.ts:1:4:
      1 │ if (x === -0) {}
        ╵     ~~~~~~~~

1 warning and 1 error
";

    #[test]
    fn parses_errors_and_warnings_with_locations() {
        let (errors, warnings) = parse_log(LOG);
        assert_eq!(errors.len(), 1);
        assert_eq!(warnings.len(), 1);

        let err = &errors[0];
        assert_eq!(err.text, "Could not resolve \"missing\"");
        let loc = err.location.as_ref().unwrap();
        assert_eq!(loc.file, "ui/site/src/site.ts");
        assert_eq!((loc.line, loc.column), (3, 18));
        assert_eq!(loc.line_text, "import { x } from \"missing\";");

        assert_eq!(
            warnings[0].location.as_ref().unwrap().file,
            "ui/lib/src/num.ts"
        );
    }

    #[test]
    fn empty_log_has_no_messages() {
        let (errors, warnings) = parse_log("");
        assert!(errors.is_empty() && warnings.is_empty());
    }
}
