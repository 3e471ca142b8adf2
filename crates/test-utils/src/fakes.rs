//! Scripted stand-ins for the external tools.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use uibuild::bundle::metafile::{ImportRecord, OutputFile};
use uibuild::bundle::plugin::{apply_on_load, run_on_end};
use uibuild::bundle::{
    BuildResult, BundleContext, BundleMessage, BundleOptions, BundlePlugin, Bundler, Metafile,
    TransformOutput,
};
use uibuild::style::StyleCompiler;
use uibuild::typecheck::worker::{Diagnostic, WorkerBackend, WorkerEvent, WorkerJob, WorkerMessage};
use uibuild::types::BoxFuture;

/// Uppercase 8-character content hash, shaped like the bundler's.
fn fake_hash(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:08X}", hasher.finish() as u32)
}

#[derive(Default)]
struct BundlerLog {
    builds: Vec<BundleOptions>,
    started: usize,
    disposed: usize,
}

/// Bundler that "bundles" each entry point by copying it (after the load
/// hooks) to `<outdir>/<stem>.<HASH>.js`, every entry importing one shared
/// `common` chunk.
///
/// An entry containing `SYNTAX ERROR` fails the build with one error.
#[derive(Clone)]
pub struct FakeBundler {
    root: PathBuf,
    log: Arc<Mutex<BundlerLog>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeBundler {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            log: Arc::default(),
            gate: None,
        }
    }

    /// A bundler whose rebuilds wait for [`FakeBundler::release`].
    pub fn gated(root: &Path) -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(root)
        }
    }

    /// Let one waiting rebuild through.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Rebuilds that have started, finished or not.
    pub fn started(&self) -> usize {
        self.log.lock().unwrap().started
    }

    /// Options of every build so far.
    pub fn builds(&self) -> Vec<BundleOptions> {
        self.log.lock().unwrap().builds.clone()
    }

    pub fn disposed(&self) -> usize {
        self.log.lock().unwrap().disposed
    }
}

impl Bundler for FakeBundler {
    fn context(
        &self,
        options: BundleOptions,
        plugins: Vec<Arc<dyn BundlePlugin>>,
    ) -> BoxFuture<'_, Result<Box<dyn BundleContext>>> {
        Box::pin(async move {
            let ctx: Box<dyn BundleContext> = Box::new(FakeContext {
                root: self.root.clone(),
                options,
                plugins,
                log: Arc::clone(&self.log),
                gate: self.gate.clone(),
            });
            Ok(ctx)
        })
    }

    fn transform<'a>(&'a self, _path: &'a Path, source: &'a str) -> BoxFuture<'a, Result<TransformOutput>> {
        Box::pin(async move {
            if source.contains("SYNTAX ERROR") {
                return Ok(TransformOutput {
                    errors: vec![BundleMessage::new("Unexpected \"ERROR\"")],
                    ..TransformOutput::default()
                });
            }
            Ok(TransformOutput {
                code: source.split_whitespace().collect::<Vec<_>>().join(" "),
                ..TransformOutput::default()
            })
        })
    }
}

struct FakeContext {
    root: PathBuf,
    options: BundleOptions,
    plugins: Vec<Arc<dyn BundlePlugin>>,
    log: Arc<Mutex<BundlerLog>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeContext {
    fn rel(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn build(&self) -> Result<BuildResult> {
        self.log.lock().unwrap().builds.push(self.options.clone());
        std::fs::create_dir_all(&self.options.outdir)?;

        let mut outputs = BTreeMap::new();
        let mut inputs = BTreeMap::new();
        let mut bundled = Vec::new();
        for entry in &self.options.entry_points {
            let source = std::fs::read_to_string(entry)
                .with_context(|| format!("reading {}", entry.display()))?;
            if source.contains("SYNTAX ERROR") {
                return Ok(BuildResult {
                    errors: vec![BundleMessage::new(format!(
                        "Unexpected \"ERROR\" in {}",
                        self.rel(entry)
                    ))],
                    ..BuildResult::default()
                });
            }
            let source = apply_on_load(&self.plugins, entry, &source).unwrap_or(source);
            inputs.insert(self.rel(entry), serde::de::IgnoredAny);
            bundled.push((entry.clone(), source));
        }

        let common_hash = fake_hash("common");
        let common = self
            .options
            .outdir
            .join(format!("common.{common_hash}.js"));
        std::fs::write(&common, "export {};")?;
        outputs.insert(self.rel(&common), OutputFile::default());

        for (entry, source) in bundled {
            let stem = entry
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let out = self
                .options
                .outdir
                .join(format!("{stem}.{}.js", fake_hash(&source)));
            std::fs::write(&out, &source)?;
            outputs.insert(
                self.rel(&out),
                OutputFile {
                    imports: vec![ImportRecord {
                        path: self.rel(&common),
                        kind: "import-statement".to_string(),
                    }],
                    entry_point: Some(self.rel(&entry)),
                },
            );
        }

        Ok(BuildResult {
            metafile: Some(Metafile { inputs, outputs }),
            ..BuildResult::default()
        })
    }
}

impl BundleContext for FakeContext {
    fn rebuild(&mut self) -> BoxFuture<'_, Result<BuildResult>> {
        Box::pin(async move {
            self.log.lock().unwrap().started += 1;
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await?;
            }
            let result = self.build()?;
            run_on_end(&self.plugins, &result);
            Ok(result)
        })
    }

    fn dispose(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.log.lock().unwrap().disposed += 1;
        })
    }
}

/// Worker backend that answers every job right away.
///
/// Jobs whose project list mentions a failing package report one
/// diagnostic instead of `ok`. In watch mode workers stay alive until
/// aborted.
#[derive(Clone, Default)]
pub struct FakeWorkerBackend {
    failing: Arc<Mutex<Vec<(String, Diagnostic)>>>,
    jobs: Arc<Mutex<Vec<WorkerJob>>>,
    silent: bool,
}

impl FakeWorkerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers that never report anything and run until aborted.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Make every job containing a project of package `pkg` fail.
    pub fn fail_package(&self, pkg: &str, code: i32, text: &str) {
        self.failing.lock().unwrap().push((
            pkg.to_string(),
            Diagnostic {
                code,
                text: text.to_string(),
                file: None,
                line: None,
                col: None,
            },
        ));
    }

    pub fn jobs(&self) -> Vec<WorkerJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl WorkerBackend for FakeWorkerBackend {
    fn spawn(&self, job: WorkerJob, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<JoinHandle<()>> {
        self.jobs.lock().unwrap().push(job.clone());
        let failure = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .find(|(pkg, _)| {
                job.projects
                    .iter()
                    .any(|p| p.to_string_lossy().contains(&format!("/{pkg}.")))
            })
            .map(|(_, diag)| diag.clone());

        if self.silent {
            return Ok(tokio::spawn(std::future::pending::<()>()));
        }
        Ok(tokio::spawn(async move {
            let index = job.index;
            let _ = events.send(WorkerEvent::Message(WorkerMessage::Busy { index }));
            let msg = match failure {
                Some(data) => WorkerMessage::Error { index, data },
                None => WorkerMessage::Ok { index },
            };
            let _ = events.send(WorkerEvent::Message(msg));
            if job.watch {
                std::future::pending::<()>().await;
            }
        }))
    }
}

/// Style compiler that returns the source text as CSS.
#[derive(Clone, Default)]
pub struct FakeStyleCompiler;

impl StyleCompiler for FakeStyleCompiler {
    fn compile<'a>(&'a self, src: &'a Path, _prod: bool) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            std::fs::read_to_string(src).with_context(|| format!("reading {}", src.display()))
        })
    }
}
