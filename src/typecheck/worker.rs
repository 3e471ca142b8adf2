// src/typecheck/worker.rs

//! Type-check worker protocol and backends.
//!
//! A worker is handed a list of project files and reports newline-delimited
//! JSON messages `{type: "ok"|"busy"|"error", index, data?}`. The
//! [`WorkerBackend`] trait hides how workers are started so tests can
//! script them; production uses [`ProcessWorkerBackend`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::lock;
use crate::types::PassKind;

/// Diagnostic payload of an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Diagnostic {
    pub code: i32,
    pub text: String,
    #[serde(default)]
    pub file: Option<String>,
    /// Zero-based.
    #[serde(default)]
    pub line: Option<u32>,
    /// Zero-based.
    #[serde(default)]
    pub col: Option<u32>,
}

/// One message from a worker, tagged by its index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ok { index: usize },
    Busy { index: usize },
    Error { index: usize, data: Diagnostic },
}

impl WorkerMessage {
    pub fn index(&self) -> usize {
        match self {
            WorkerMessage::Ok { index }
            | WorkerMessage::Busy { index }
            | WorkerMessage::Error { index, .. } => *index,
        }
    }
}

/// What a running worker reports back to its pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Message(WorkerMessage),
    /// The worker died; the whole process has to stop.
    Crashed { index: usize, message: String },
}

/// Work handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerJob {
    pub index: usize,
    pub kind: PassKind,
    pub projects: Vec<PathBuf>,
    /// Keep running and report again after every rebuild.
    pub watch: bool,
}

/// Trait abstracting how type-check workers are started.
pub trait WorkerBackend: Send + Sync {
    /// Start a worker for `job`. Its messages go to `events`; dropping or
    /// aborting the returned task terminates the worker.
    fn spawn(&self, job: WorkerJob, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<JoinHandle<()>>;
}

/// Live worker and pass tasks of one build context.
///
/// The generation advances on every [`WorkerSet::stop_all`]; a pass
/// started under an older generation must not spawn more workers.
#[derive(Debug, Default)]
pub struct WorkerSet {
    tasks: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl WorkerSet {
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn add(&self, task: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).iter().filter(|t| !t.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminate every worker unconditionally and wait until they are gone.
    pub async fn stop_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.tasks));
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Spawns the configured worker command:
/// `<command...> --index N [--watch] <project files...>`.
#[derive(Debug, Clone)]
pub struct ProcessWorkerBackend {
    cwd: PathBuf,
    command: Vec<String>,
}

impl ProcessWorkerBackend {
    pub fn new(cwd: &Path, command: Vec<String>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            command,
        }
    }
}

impl WorkerBackend for ProcessWorkerBackend {
    fn spawn(&self, job: WorkerJob, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<JoinHandle<()>> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("empty type-check worker command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).arg("--index").arg(job.index.to_string());
        if job.watch {
            cmd.arg("--watch");
        }
        cmd.args(&job.projects)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning type-check worker {}", job.index))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let index = job.index;

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = index, "stderr: {}", line);
                }
            });
        }

        Ok(tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match parse_line(&line) {
                        Some(msg) => {
                            if events.send(WorkerEvent::Message(msg)).is_err() {
                                break;
                            }
                        }
                        None => debug!(worker = index, "stdout: {}", line),
                    }
                }
            }

            let crash = match child.wait().await {
                Ok(status) if status.success() && !job.watch => None,
                Ok(status) => Some(format!("exited with {status}")),
                Err(err) => Some(err.to_string()),
            };
            if let Some(message) = crash {
                warn!(worker = index, "{message}");
                let _ = events.send(WorkerEvent::Crashed { index, message });
            }
        }))
    }
}

/// Parse one protocol line; anything else is worker chatter.
pub fn parse_line(line: &str) -> Option<WorkerMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}
