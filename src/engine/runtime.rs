// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::BuildContext;
use crate::engine::driver::{self, Session};
use crate::engine::{BuildEvent, EngineCommand, EngineCore};

/// Async IO shell around [`EngineCore`].
///
/// Reads [`BuildEvent`]s, feeds them to the core and executes the
/// resulting commands against the live [`BuildContext`], created from the
/// [`Session`] on `StartBuild`.
pub struct Runtime {
    core: EngineCore,
    events: mpsc::UnboundedReceiver<BuildEvent>,
    session: Session,
    ctx: Option<Arc<BuildContext>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        core: EngineCore,
        events: mpsc::UnboundedReceiver<BuildEvent>,
        session: Session,
    ) -> Self {
        Self {
            core,
            events,
            session,
            ctx: None,
        }
    }

    /// The context of the current build, once started.
    pub fn context(&self) -> Option<&Arc<BuildContext>> {
        self.ctx.as_ref()
    }

    /// Main event loop. Returns the process exit code.
    pub async fn run(mut self) -> Result<i32> {
        debug!(watch = self.core.is_watch(), "runtime started");

        for command in self.core.start() {
            if let Some(code) = self.execute(command).await? {
                return Ok(code);
            }
        }

        while let Some(event) = self.events.recv().await {
            debug!(?event, "runtime received event");
            if let BuildEvent::Fatal { stage, message } = &event {
                match stage {
                    Some(stage) => error!(stage = %stage, "{message}"),
                    None if !message.is_empty() => error!("{message}"),
                    None => {}
                }
            }

            let step = self.core.step(event);
            for command in step.commands {
                if let Some(code) = self.execute(command).await? {
                    return Ok(code);
                }
            }
            if !step.keep_running {
                break;
            }
        }

        info!("runtime event channel closed; exiting");
        Ok(0)
    }

    /// Execute one command. `Some(code)` ends the loop.
    async fn execute(&mut self, command: EngineCommand) -> Result<Option<i32>> {
        debug!(?command, "executing");
        match command {
            EngineCommand::StopAll => {
                if let Some(ctx) = &self.ctx {
                    ctx.stop().await;
                }
            }
            EngineCommand::StartBuild => {
                let ctx = self.session.create_context()?;
                tokio::spawn(driver::build(Arc::clone(&ctx)));
                self.ctx = Some(ctx);
            }
            EngineCommand::RestartCompilers => {
                if let Some(ctx) = &self.ctx {
                    info!("Restarting type-check and bundle");
                    tokio::spawn(driver::restart_compilers(Arc::clone(ctx)));
                }
            }
            EngineCommand::CheckQuiescence => {
                if let Some(ctx) = &self.ctx {
                    ctx.check_quiescence();
                }
            }
            EngineCommand::FlushManifest => {
                if let Some(ctx) = &self.ctx {
                    if let Err(err) = crate::manifest::flush(ctx).await {
                        warn!("manifest not written: {err:#}");
                    }
                }
            }
            EngineCommand::Exit(code) => return Ok(Some(code)),
        }
        Ok(None)
    }
}
