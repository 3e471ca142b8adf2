// src/status.rs

//! Per-stage build status and the "builders ok" predicate.
//!
//! This is pure bookkeeping. Logging, manifest publication and process exit
//! on failure are driven by [`BuildContext`](crate::context::BuildContext),
//! which owns the registry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::Stage;

/// State of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Switched off for this run.
    Disabled,
    /// Running, or never reported.
    Pending,
    /// Last reported exit code; `0` is clean.
    Exit(i32),
}

#[derive(Debug)]
pub struct StatusRegistry {
    stages: HashMap<Stage, StageStatus>,
    package_count: usize,
    building_count: usize,
    started: Option<Instant>,
}

impl StatusRegistry {
    pub fn new(package_count: usize, building_count: usize) -> Self {
        Self {
            stages: HashMap::new(),
            package_count,
            building_count,
            started: Some(Instant::now()),
        }
    }

    pub fn get(&self, stage: Stage) -> StageStatus {
        self.stages
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    /// Mark `stage` as started.
    ///
    /// `Some(false)` disables the stage, `Some(true)` re-enables it, and
    /// `None` starts it unless it was disabled earlier. Returns whether the
    /// stage should run.
    pub fn begin(&mut self, stage: Stage, enable: Option<bool>) -> bool {
        let current = self.get(stage);
        match enable {
            Some(false) => {
                self.stages.insert(stage, StageStatus::Disabled);
            }
            Some(true) => {
                self.stages.insert(stage, StageStatus::Pending);
            }
            None if current != StageStatus::Disabled => {
                self.stages.insert(stage, StageStatus::Pending);
            }
            None => {}
        }
        self.get(stage) != StageStatus::Disabled
    }

    /// Record `code` for `stage`. Returns `true` when the code differs from
    /// the previous state, i.e. when the outcome is worth logging.
    pub fn done(&mut self, stage: Stage, code: i32) -> bool {
        let changed = self.get(stage) != StageStatus::Exit(code);
        self.stages.insert(stage, StageStatus::Exit(code));
        changed
    }

    /// Every package is building and every gating stage reported `0`.
    pub fn builders_ok(&self) -> bool {
        self.building_count == self.package_count
            && Stage::GATING
                .iter()
                .all(|s| self.get(*s) == StageStatus::Exit(0))
    }

    /// Time since the build (or the last restart) began. Returns `Some` only
    /// once per start.
    pub fn take_elapsed(&mut self) -> Option<Duration> {
        self.started.take().map(|t| t.elapsed())
    }

    /// Forget every stage outcome and restart the clock.
    pub fn reset(&mut self) {
        self.stages.clear();
        self.started = Some(Instant::now());
    }

    /// Forget the outcome of `stages` only (partial restart).
    pub fn reset_stages(&mut self, stages: &[Stage]) {
        for stage in stages {
            self.stages.remove(stage);
        }
        self.started.get_or_insert_with(Instant::now);
    }
}
