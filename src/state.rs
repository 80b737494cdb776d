//! The per-submission state machine.
//!
//! ```text
//! Idle ─▶ Authorizing ─▶ ResolvingTarget ─▶ Uploading ─▶ Notifying ─▶ Done
//!              ▲                │               │
//!              └── AuthExpired ─┴───────────────┘   (at most once)
//!
//! any non-terminal state ─▶ Failed
//! ```
//!
//! [`StateMachine`] enforces the edges and records the walk so callers (and
//! tests) can check that a run visited each state exactly once.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Authorizing,
    ResolvingTarget,
    Uploading,
    Notifying,
    Done,
    Failed,
}

impl SubmissionState {
    /// `Done` and `Failed` end a submission.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Done | SubmissionState::Failed)
    }

    /// Forward edges of the happy path, plus the edge into `Failed`.
    ///
    /// The recovery edge back to `Authorizing` is not listed here; it goes
    /// through [`StateMachine::recover`] so it can be counted.
    pub fn can_advance_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, Authorizing)
            | (Authorizing, ResolvingTarget)
            | (ResolvingTarget, Uploading)
            | (Uploading, Notifying)
            | (Notifying, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionState::Idle => "idle",
            SubmissionState::Authorizing => "authorizing",
            SubmissionState::ResolvingTarget => "resolving upload target",
            SubmissionState::Uploading => "uploading",
            SubmissionState::Notifying => "notifying evaluator",
            SubmissionState::Done => "done",
            SubmissionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks one submission's walk through [`SubmissionState`]s.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: SubmissionState,
    history: Vec<SubmissionState>,
    recovered: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: SubmissionState::Idle,
            history: vec![SubmissionState::Idle],
            recovered: false,
        }
    }

    pub fn current(&self) -> SubmissionState {
        self.current
    }

    /// Every state entered so far, in order, starting with `Idle`.
    pub fn history(&self) -> &[SubmissionState] {
        &self.history
    }

    /// Whether the single `AuthExpired` recovery edge has been used.
    pub fn has_recovered(&self) -> bool {
        self.recovered
    }

    /// Move along a forward edge.
    pub fn advance(&mut self, next: SubmissionState) -> Result<(), PipelineError> {
        if !self.current.can_advance_to(next) {
            return Err(PipelineError::Internal(format!(
                "illegal submission transition {} -> {}",
                self.current, next
            )));
        }
        self.enter(next);
        Ok(())
    }

    /// Take the `AuthExpired` edge back to `Authorizing`.
    ///
    /// Returns `false` (and leaves the state untouched) when the edge was
    /// already used or the current state cannot take it.
    pub fn recover(&mut self) -> bool {
        let eligible = matches!(
            self.current,
            SubmissionState::ResolvingTarget | SubmissionState::Uploading
        );
        if self.recovered || !eligible {
            return false;
        }
        self.recovered = true;
        self.enter(SubmissionState::Authorizing);
        true
    }

    /// Enter `Failed`. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.enter(SubmissionState::Failed);
        }
    }

    fn enter(&mut self, next: SubmissionState) {
        self.current = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubmissionState::*;

    #[test]
    fn happy_path_visits_each_state_once() {
        let mut sm = StateMachine::new();
        for next in [Authorizing, ResolvingTarget, Uploading, Notifying, Done] {
            sm.advance(next).unwrap();
        }
        assert_eq!(
            sm.history(),
            &[Idle, Authorizing, ResolvingTarget, Uploading, Notifying, Done]
        );
        assert!(sm.current().is_terminal());
        assert!(!sm.has_recovered());
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut sm = StateMachine::new();
        sm.advance(Authorizing).unwrap();
        let err = sm.advance(Uploading).unwrap_err();
        assert!(err.to_string().contains("authorizing -> uploading"));
        assert_eq!(sm.current(), Authorizing);
    }

    #[test]
    fn recovery_edge_is_taken_at_most_once() {
        let mut sm = StateMachine::new();
        sm.advance(Authorizing).unwrap();
        sm.advance(ResolvingTarget).unwrap();
        assert!(sm.recover());
        assert_eq!(sm.current(), Authorizing);

        sm.advance(ResolvingTarget).unwrap();
        sm.advance(Uploading).unwrap();
        assert!(!sm.recover(), "second recovery must be refused");
        assert_eq!(sm.current(), Uploading);
    }

    #[test]
    fn recovery_not_allowed_from_notifying() {
        let mut sm = StateMachine::new();
        for next in [Authorizing, ResolvingTarget, Uploading, Notifying] {
            sm.advance(next).unwrap();
        }
        assert!(!sm.recover());
    }

    #[test]
    fn fail_is_terminal_and_idempotent() {
        let mut sm = StateMachine::new();
        sm.advance(Authorizing).unwrap();
        sm.fail();
        sm.fail();
        assert_eq!(sm.history(), &[Idle, Authorizing, Failed]);
        assert!(sm.advance(ResolvingTarget).is_err());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(ResolvingTarget.to_string(), "resolving upload target");
        assert_eq!(Notifying.to_string(), "notifying evaluator");
    }
}
