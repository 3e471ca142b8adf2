// src/typecheck/join.rs

//! Waiting for every worker of one pass.

use crate::typecheck::worker::{Diagnostic, WorkerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Busy,
    Ok,
    Error,
}

/// Result of feeding one message to a [`PassJoin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinUpdate {
    /// Dropped without changing state.
    Ignored,
    /// Some worker is still busy or failing.
    Waiting,
    /// A diagnostic to report right away.
    Failed(Diagnostic),
    /// Every worker reported `ok`.
    AllOk,
}

/// Tracks the last reported state of each worker of a pass.
#[derive(Debug, Clone)]
pub struct PassJoin {
    watch: bool,
    states: Vec<WorkerState>,
}

impl PassJoin {
    pub fn new(workers: usize, watch: bool) -> Self {
        Self {
            watch,
            states: vec![WorkerState::Busy; workers],
        }
    }

    pub fn observe(&mut self, msg: &WorkerMessage) -> JoinUpdate {
        let Some(state) = self.states.get_mut(msg.index()) else {
            return JoinUpdate::Ignored;
        };
        // A watching compiler reports one spurious `ok` right after its
        // first errors; a worker only recovers through `busy` first.
        if self.watch && matches!(msg, WorkerMessage::Ok { .. }) && *state == WorkerState::Error {
            return JoinUpdate::Ignored;
        }

        match msg {
            WorkerMessage::Busy { .. } => {
                *state = WorkerState::Busy;
                JoinUpdate::Waiting
            }
            WorkerMessage::Error { data, .. } => {
                *state = WorkerState::Error;
                JoinUpdate::Failed(data.clone())
            }
            WorkerMessage::Ok { .. } => {
                *state = WorkerState::Ok;
                if self.all_ok() {
                    JoinUpdate::AllOk
                } else {
                    JoinUpdate::Waiting
                }
            }
        }
    }

    pub fn all_ok(&self) -> bool {
        self.states.iter().all(|s| *s == WorkerState::Ok)
    }

    /// No worker is busy any more.
    pub fn all_settled(&self) -> bool {
        self.states.iter().all(|s| *s != WorkerState::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(index: usize) -> WorkerMessage {
        WorkerMessage::Ok { index }
    }

    fn busy(index: usize) -> WorkerMessage {
        WorkerMessage::Busy { index }
    }

    fn err(index: usize, code: i32) -> WorkerMessage {
        WorkerMessage::Error {
            index,
            data: Diagnostic {
                code,
                text: "Type 'string' is not assignable to type 'number'.".into(),
                file: None,
                line: None,
                col: None,
            },
        }
    }

    #[test]
    fn resolves_only_when_every_worker_is_ok() {
        let mut join = PassJoin::new(2, false);
        assert_eq!(join.observe(&ok(0)), JoinUpdate::Waiting);
        assert_eq!(join.observe(&ok(1)), JoinUpdate::AllOk);
    }

    #[test]
    fn errors_are_reported_without_waiting_for_siblings() {
        let mut join = PassJoin::new(3, false);
        assert!(matches!(join.observe(&err(1, 2322)), JoinUpdate::Failed(d) if d.code == 2322));
        assert!(!join.all_settled());
        join.observe(&ok(0));
        join.observe(&ok(2));
        assert!(join.all_settled());
        assert!(!join.all_ok());
    }

    #[test]
    fn watch_mode_ignores_first_ok_after_error() {
        let mut join = PassJoin::new(1, true);
        assert!(matches!(join.observe(&err(0, 2304)), JoinUpdate::Failed(_)));
        assert_eq!(join.observe(&ok(0)), JoinUpdate::Ignored);
        assert!(!join.all_ok());

        assert_eq!(join.observe(&busy(0)), JoinUpdate::Waiting);
        assert_eq!(join.observe(&ok(0)), JoinUpdate::AllOk);
    }

    #[test]
    fn one_shot_mode_accepts_ok_after_error() {
        let mut join = PassJoin::new(1, false);
        join.observe(&err(0, 2304));
        assert_eq!(join.observe(&ok(0)), JoinUpdate::AllOk);
    }

    #[test]
    fn unknown_index_is_ignored() {
        let mut join = PassJoin::new(1, false);
        assert_eq!(join.observe(&ok(7)), JoinUpdate::Ignored);
    }
}
