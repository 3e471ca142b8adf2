// src/engine/core.rs

//! Pure core state machine.
//!
//! Consumes [`BuildEvent`]s and produces the commands the IO shell
//! (`engine::runtime::Runtime`) should run. No Tokio, channels or
//! filesystem here, so every transition is unit tested directly.

use crate::engine::BuildEvent;

/// Command produced by the core, executed by the runtime shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Stop every pipeline of the current context.
    StopAll,
    /// Discover packages and start every stage in a fresh context.
    StartBuild,
    /// Cancel pending publication and rerun type-check and bundle.
    RestartCompilers,
    /// Publish the manifest if the workspace is quiescent.
    CheckQuiescence,
    /// Publish pending manifest changes now, bypassing the debounce.
    FlushManifest,
    /// Leave the event loop with this process exit code.
    Exit(i32),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStep {
    pub commands: Vec<EngineCommand>,
    pub keep_running: bool,
}

impl EngineStep {
    fn run(commands: Vec<EngineCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn exit(mut commands: Vec<EngineCommand>, code: i32) -> Self {
        commands.push(EngineCommand::Exit(code));
        Self {
            commands,
            keep_running: false,
        }
    }
}

#[derive(Debug)]
pub struct EngineCore {
    watch: bool,
    /// One-shot mode: first non-zero stage code, reported once the pass
    /// has finished.
    failed: Option<i32>,
}

impl EngineCore {
    pub fn new(watch: bool) -> Self {
        Self {
            watch,
            failed: None,
        }
    }

    pub fn is_watch(&self) -> bool {
        self.watch
    }

    /// Commands to run before the first event.
    pub fn start(&self) -> Vec<EngineCommand> {
        vec![EngineCommand::StartBuild]
    }

    pub fn step(&mut self, event: BuildEvent) -> EngineStep {
        match event {
            BuildEvent::Fatal { .. } => EngineStep::exit(vec![EngineCommand::StopAll], 1),
            BuildEvent::Exit(code) => {
                if !self.watch && code != 0 {
                    self.failed.get_or_insert(code);
                }
                EngineStep::run(Vec::new())
            }
            BuildEvent::DependenciesChanged if self.watch => {
                EngineStep::exit(vec![EngineCommand::StopAll], 1)
            }
            BuildEvent::RestartCompilers if self.watch => {
                EngineStep::run(vec![EngineCommand::RestartCompilers])
            }
            BuildEvent::DependenciesChanged | BuildEvent::RestartCompilers => {
                EngineStep::run(Vec::new())
            }
            BuildEvent::WatchSettled => EngineStep::run(vec![EngineCommand::CheckQuiescence]),
            BuildEvent::BuildFinished if self.watch => {
                EngineStep::run(vec![EngineCommand::CheckQuiescence])
            }
            BuildEvent::BuildFinished => {
                let stop = EngineCommand::StopAll;
                match self.failed {
                    Some(code) => EngineStep::exit(vec![stop], code),
                    None => EngineStep::exit(vec![EngineCommand::FlushManifest, stop], 0),
                }
            }
            BuildEvent::ShutdownRequested => EngineStep::exit(vec![EngineCommand::StopAll], 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;

    #[test]
    fn one_shot_success_flushes_then_exits_zero() {
        let mut core = EngineCore::new(false);
        let step = core.step(BuildEvent::BuildFinished);
        assert!(!step.keep_running);
        assert_eq!(
            step.commands,
            vec![EngineCommand::FlushManifest, EngineCommand::StopAll, EngineCommand::Exit(0)]
        );
    }

    #[test]
    fn one_shot_failure_waits_for_the_pass_and_keeps_first_code() {
        let mut core = EngineCore::new(false);
        assert!(core.step(BuildEvent::Exit(2)).keep_running);
        assert!(core.step(BuildEvent::Exit(5)).keep_running);

        let step = core.step(BuildEvent::BuildFinished);
        assert_eq!(step.commands, vec![EngineCommand::StopAll, EngineCommand::Exit(2)]);
    }

    #[test]
    fn watch_mode_keeps_running_on_build_failures() {
        let mut core = EngineCore::new(true);
        assert_eq!(core.step(BuildEvent::Exit(1)).commands, vec![]);

        assert_eq!(
            core.step(BuildEvent::RestartCompilers).commands,
            vec![EngineCommand::RestartCompilers]
        );
        assert_eq!(
            core.step(BuildEvent::BuildFinished).commands,
            vec![EngineCommand::CheckQuiescence]
        );
    }

    #[test]
    fn fatal_always_exits_one() {
        for watch in [false, true] {
            let mut core = EngineCore::new(watch);
            let step = core.step(BuildEvent::Fatal {
                stage: Some(Stage::TypeCheck),
                message: "worker 0 exited".into(),
            });
            assert!(!step.keep_running);
            assert_eq!(step.commands.last(), Some(&EngineCommand::Exit(1)));
        }
    }

    #[test]
    fn watch_mode_exits_when_dependencies_change() {
        let mut core = EngineCore::new(true);
        let step = core.step(BuildEvent::DependenciesChanged);
        assert!(!step.keep_running);
        assert_eq!(
            step.commands,
            vec![EngineCommand::StopAll, EngineCommand::Exit(1)]
        );
    }

    #[test]
    fn restarts_are_ignored_outside_watch_mode() {
        let mut core = EngineCore::new(false);
        assert!(core.step(BuildEvent::DependenciesChanged).commands.is_empty());
        assert!(core.step(BuildEvent::RestartCompilers).commands.is_empty());
    }
}
