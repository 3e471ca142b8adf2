// src/bundle/host.rs

//! Line protocol with the bundler host.
//!
//! The host is a long-lived process owning one incremental esbuild
//! context. Requests go to its stdin and messages come back on its
//! stdout, one JSON object per line:
//!
//! - `{"type":"build", entryPoints, outdir, metafile, ...}` opens the
//!   context with the full esbuild options, `{"type":"rebuild"}` runs it, `{"type":"dispose"}` ends it.
//! - While building, the host sends `{"type":"load", id, path, source}`
//!   for every TypeScript source and waits for
//!   `{"type":"loaded", id, contents}`; `contents: null` keeps the source.
//! - A build ends with `{"type":"end", errors, warnings, metafile}`.
//!
//! Lines that are not JSON objects are host chatter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::debug;

use crate::bundle::plugin::apply_on_load;
use crate::bundle::{BuildResult, BundleMessage, BundleOptions, BundlePlugin, Location, Metafile};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostRequest<'a> {
    Build {
        #[serde(rename = "entryPoints")]
        entry_points: &'a [PathBuf],
        outdir: &'a Path,
        metafile: &'a Path,
        bundle: bool,
        splitting: bool,
        format: &'static str,
        target: &'static str,
        #[serde(rename = "entryNames")]
        entry_names: &'static str,
        #[serde(rename = "chunkNames")]
        chunk_names: &'static str,
        minify: bool,
        sourcemap: bool,
    },
    Rebuild,
    Loaded {
        id: u64,
        contents: Option<String>,
    },
    Dispose,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    Load {
        id: u64,
        path: PathBuf,
        source: String,
    },
    End {
        #[serde(default)]
        errors: Vec<WireMessage>,
        #[serde(default)]
        warnings: Vec<WireMessage>,
        #[serde(default)]
        metafile: Option<Metafile>,
    },
}

/// esbuild's message shape.
#[derive(Debug, Deserialize)]
pub struct WireMessage {
    text: String,
    #[serde(default)]
    location: Option<WireLocation>,
}

#[derive(Debug, Deserialize)]
struct WireLocation {
    file: String,
    line: u32,
    column: u32,
    #[serde(default, rename = "lineText")]
    line_text: String,
}

impl From<WireMessage> for BundleMessage {
    fn from(msg: WireMessage) -> Self {
        Self {
            text: msg.text,
            location: msg.location.map(|loc| Location {
                file: loc.file,
                line: loc.line,
                column: loc.column,
                line_text: loc.line_text,
            }),
        }
    }
}

/// Parse one host line; anything else is chatter.
pub fn parse_line(line: &str) -> Option<HostMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// One open bundle context on the other side of a host connection.
pub struct HostSession<R, W> {
    lines: Lines<R>,
    writer: W,
}

impl<R, W> HostSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Ask the host to open a context over `options`.
    pub async fn open(reader: R, writer: W, options: &BundleOptions) -> Result<Self> {
        let mut session = Self {
            lines: reader.lines(),
            writer,
        };
        session
            .send(&HostRequest::Build {
                entry_points: &options.entry_points,
                outdir: &options.outdir,
                metafile: &options.metafile,
                bundle: true,
                splitting: true,
                format: "esm",
                target: "es2020",
                entry_names: "[name].[hash]",
                chunk_names: "common.[hash]",
                minify: options.prod,
                sourcemap: !options.prod,
            })
            .await?;
        Ok(session)
    }

    async fn send(&mut self, request: &HostRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("writing to the bundler host")?;
        self.writer.flush().await.context("flushing the bundler host")?;
        Ok(())
    }

    /// Run one build, answering load requests through `plugins`.
    pub async fn rebuild(&mut self, plugins: &[Arc<dyn BundlePlugin>]) -> Result<BuildResult> {
        self.send(&HostRequest::Rebuild).await?;
        while let Some(line) = self.lines.next_line().await.context("reading the bundler host")? {
            match parse_line(&line) {
                Some(HostMessage::Load { id, path, source }) => {
                    let contents = apply_on_load(plugins, &path, &source);
                    self.send(&HostRequest::Loaded { id, contents }).await?;
                }
                Some(HostMessage::End {
                    errors,
                    warnings,
                    metafile,
                }) => {
                    return Ok(BuildResult {
                        errors: errors.into_iter().map(BundleMessage::from).collect(),
                        warnings: warnings.into_iter().map(BundleMessage::from).collect(),
                        metafile,
                    });
                }
                None => debug!("bundler host: {line}"),
            }
        }
        bail!("bundler host exited during a build")
    }

    /// Tell the host to drop its context. Errors mean it is already gone.
    pub async fn dispose(&mut self) {
        if let Err(err) = self.send(&HostRequest::Dispose).await {
            debug!("bundler host dispose: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::plugin::HtmlCompaction;
    use serde_json::{json, Value};
    use tokio::io::{duplex, split, BufReader};

    #[test]
    fn parses_load_and_end_messages() {
        let load = parse_line(r#"{"type":"load","id":3,"path":"/r/a.ts","source":"x"}"#);
        assert!(matches!(load, Some(HostMessage::Load { id: 3, .. })));

        let end = parse_line(
            r#"{"type":"end","errors":[{"text":"bad","location":{"file":"a.ts","line":2,"column":4,"lineText":"let x ="}}]}"#,
        );
        let Some(HostMessage::End { errors, metafile, .. }) = end else {
            panic!("expected end message");
        };
        let msg = BundleMessage::from(errors.into_iter().next().unwrap());
        assert_eq!(msg.location.unwrap().line_text, "let x =");
        assert!(metafile.is_none());

        assert!(parse_line("[watch] build started").is_none());
    }

    #[tokio::test]
    async fn load_hooks_rewrite_sources_before_the_host_parses_them() {
        let (ours, theirs) = duplex(64 * 1024);
        let (our_read, our_write) = split(ours);
        let (their_read, mut their_write) = split(theirs);
        let mut their_lines = BufReader::new(their_read).lines();

        let options = BundleOptions {
            entry_points: vec![PathBuf::from("/r/ui/site/src/site.ts")],
            outdir: PathBuf::from("/r/public/compiled"),
            metafile: PathBuf::from("/r/ui/.build/build/bundle.meta.json"),
            prod: false,
        };
        let plugins: Vec<Arc<dyn BundlePlugin>> = vec![Arc::new(HtmlCompaction)];

        let host = async {
            let build: Value = serde_json::from_str(&their_lines.next_line().await?.unwrap())?;
            assert_eq!(build["type"], "build");
            assert_eq!(build["entryPoints"], json!(["/r/ui/site/src/site.ts"]));
            assert_eq!(build["chunkNames"], "common.[hash]");
            assert_eq!(build["sourcemap"], true);
            let rebuild: Value = serde_json::from_str(&their_lines.next_line().await?.unwrap())?;
            assert_eq!(rebuild["type"], "rebuild");

            let load = json!({
                "type": "load",
                "id": 7,
                "path": "/r/ui/site/src/site.ts",
                "source": "const v = $html`\n  <p>\n    hi\n  </p>\n`;",
            });
            their_write.write_all(format!("compiling...\n{load}\n").as_bytes()).await?;
            let loaded: Value = serde_json::from_str(&their_lines.next_line().await?.unwrap())?;

            let end = json!({"type": "end", "errors": [], "warnings": []});
            their_write.write_all(format!("{end}\n").as_bytes()).await?;
            anyhow::Ok(loaded)
        };
        let bundler = async {
            let mut session = HostSession::open(BufReader::new(our_read), our_write, &options).await?;
            session.rebuild(&plugins).await
        };

        let (loaded, result) = tokio::join!(host, bundler);
        let loaded = loaded.unwrap();
        assert_eq!(loaded["type"], "loaded");
        assert_eq!(loaded["id"], 7);
        assert_eq!(loaded["contents"], "const v = `<p> hi </p>`;");

        let result = result.unwrap();
        assert!(result.errors.is_empty());
        assert!(result.metafile.is_none());
    }
}
