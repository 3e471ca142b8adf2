// src/engine/mod.rs

//! Orchestration engine for uibuild.
//!
//! Pipelines never exit the process or restart each other directly. They
//! report [`BuildEvent`]s on one channel; the pure [`core`] state machine
//! turns each event into [`EngineCommand`]s, and the async shell in
//! [`runtime`] executes them against the live [`BuildContext`].
//!
//! [`driver`] starts the stage pipelines for one context; [`monitor`]
//! watches the declaration files that invalidate the whole build.
//!
//! [`BuildContext`]: crate::context::BuildContext

use crate::types::Stage;

/// Events flowing into the runtime from pipelines, the watcher and signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Unrecoverable failure (configuration error, worker crash).
    Fatal {
        stage: Option<Stage>,
        message: String,
    },
    /// One-shot mode: a stage finished with a non-zero code.
    Exit(i32),
    /// A package declaration changed. Watch mode exits so dependencies
    /// can be reinstalled.
    DependenciesChanged,
    /// Shared type declarations changed; rerun type-check and bundle.
    RestartCompilers,
    /// A watch subscription finished a successful rebuild.
    WatchSettled,
    /// The initial pass of every stage has returned.
    BuildFinished,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod driver;
pub mod monitor;
pub mod runtime;

pub use core::{EngineCommand, EngineCore, EngineStep};
pub use driver::Session;
pub use runtime::Runtime;
