//! Run records and the run state machine.
//!
//! A run follows a strict state machine:
//! `Queued -> Starting -> Running -> Verifying -> (Running again, on fix
//! retry) -> Succeeded | Failed | TimedOut | Cancelled`, with `Cancelled`
//! and `TimedOut` reachable from any non-terminal state.
//!
//! All transitions are validated (fail-closed). Once terminal, a record is
//! immutable except for artifact path additions during finalization.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DrydockError;
use crate::event::{AgentEvent, CompletionSummary};
use crate::verify::VerifyResult;

/// Run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Starting,
    Running,
    Verifying,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunState {
    /// Whether this state is terminal (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::TimedOut | RunState::Cancelled
        )
    }

    /// Whether `next` is a valid successor of this state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            // Cancellation and timeout reach in from any non-terminal state.
            (_, Cancelled) | (_, TimedOut) => true,
            (Queued, Starting) => true,
            (Starting, Running) => true,
            (Running, Verifying) => true,
            // Fix retry: a new agent invocation in the same environment.
            (Verifying, Running) => true,
            (Running, Succeeded) | (Verifying, Succeeded) => true,
            (Starting, Failed) | (Running, Failed) | (Verifying, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Queued => write!(f, "queued"),
            RunState::Starting => write!(f, "starting"),
            RunState::Running => write!(f, "running"),
            RunState::Verifying => write!(f, "verifying"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
            RunState::TimedOut => write!(f, "timed_out"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Paths to the artifacts persisted for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub request: Option<std::path::PathBuf>,
    pub result: Option<std::path::PathBuf>,
    pub events: Option<std::path::PathBuf>,
    pub log: Option<std::path::PathBuf>,
    pub patch: Option<std::path::PathBuf>,
}

/// Partial-progress counters derived from the in-flight event buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub files_changed: usize,
    pub commands_run: usize,
}

/// The mutable record of one run, owned exclusively by the lifecycle
/// manager. All other components read point-in-time snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier, generated at creation.
    pub id: Uuid,
    /// Current lifecycle state.
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Agent process exit code, once known.
    pub exit_code: Option<i32>,
    /// Isolated-environment handle, once created.
    pub container_id: Option<String>,
    /// Append-only decoded event list.
    pub events: Vec<AgentEvent>,
    /// Completion summary, once derived.
    pub summary: Option<CompletionSummary>,
    /// Whether the summary passed its output contract. `None` until
    /// validation ran; `Some(false)` marks a degraded, unvalidated result.
    pub summary_validated: Option<bool>,
    /// Verification outcome, if verification was requested.
    pub verify: Option<VerifyResult>,
    /// Agent fix re-invocations performed so far.
    pub fix_attempts: u32,
    /// Human-readable reason for the terminal state.
    pub reason: Option<String>,
    #[serde(default)]
    pub artifacts: ArtifactPaths,
}

impl RunRecord {
    /// Create a fresh record in `Queued`.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: RunState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            container_id: None,
            events: Vec::new(),
            summary: None,
            summary_validated: None,
            verify: None,
            fix_attempts: 0,
            reason: None,
            artifacts: ArtifactPaths::default(),
        }
    }

    /// Transition to `next`, stamping timestamps. Invalid transitions are
    /// rejected (fail-closed).
    pub fn transition(&mut self, next: RunState) -> Result<(), DrydockError> {
        if !self.state.can_transition_to(next) {
            return Err(DrydockError::ConfigError(format!(
                "invalid run state transition {} -> {next} for run {}",
                self.state, self.id
            )));
        }
        if next == RunState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        tracing::debug!(run_id = %self.id, from = %self.state, to = %next, "run state transition");
        self.state = next;
        Ok(())
    }

    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Progress counters derived from accumulated events.
    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for event in &self.events {
            match event {
                AgentEvent::FileChange { .. } => progress.files_changed += 1,
                AgentEvent::CommandRun { .. } => progress.commands_run += 1,
                _ => {}
            }
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FileAction;

    fn record() -> RunRecord {
        RunRecord::new(Uuid::new_v4())
    }

    #[test]
    fn happy_path_transitions() {
        let mut rec = record();
        for next in [
            RunState::Starting,
            RunState::Running,
            RunState::Verifying,
            RunState::Succeeded,
        ] {
            rec.transition(next).unwrap();
        }
        assert!(rec.is_terminal());
        assert!(rec.started_at.is_some());
        assert!(rec.finished_at.is_some());
    }

    #[test]
    fn fix_retry_reenters_running() {
        let mut rec = record();
        rec.transition(RunState::Starting).unwrap();
        rec.transition(RunState::Running).unwrap();
        rec.transition(RunState::Verifying).unwrap();
        rec.transition(RunState::Running).unwrap();
        rec.transition(RunState::Verifying).unwrap();
        rec.transition(RunState::Failed).unwrap();
        assert_eq!(rec.state, RunState::Failed);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut rec = record();
        rec.transition(RunState::Cancelled).unwrap();
        assert!(rec.transition(RunState::Running).is_err());
        assert!(rec.transition(RunState::Failed).is_err());
    }

    #[test]
    fn cancel_reachable_from_every_non_terminal_state() {
        for setup in [
            vec![],
            vec![RunState::Starting],
            vec![RunState::Starting, RunState::Running],
            vec![RunState::Starting, RunState::Running, RunState::Verifying],
        ] {
            let mut rec = record();
            for s in setup {
                rec.transition(s).unwrap();
            }
            rec.transition(RunState::Cancelled).unwrap();
            assert_eq!(rec.state, RunState::Cancelled);
        }
    }

    #[test]
    fn queued_cannot_jump_to_running() {
        let mut rec = record();
        assert!(rec.transition(RunState::Running).is_err());
        assert_eq!(rec.state, RunState::Queued);
    }

    #[test]
    fn timeout_is_not_failed() {
        let mut rec = record();
        rec.transition(RunState::Starting).unwrap();
        rec.transition(RunState::Running).unwrap();
        rec.transition(RunState::TimedOut).unwrap();
        assert_eq!(rec.state, RunState::TimedOut);
        assert_ne!(rec.state, RunState::Failed);
    }

    #[test]
    fn progress_counts_file_changes_and_commands() {
        let mut rec = record();
        rec.events.push(AgentEvent::FileChange {
            path: "a.rs".into(),
            action: FileAction::Created,
            diff: None,
        });
        rec.events.push(AgentEvent::CommandRun {
            command: "ls".into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 3,
        });
        rec.events.push(AgentEvent::MessageDelta { text: "hi".into() });
        let progress = rec.progress();
        assert_eq!(progress.files_changed, 1);
        assert_eq!(progress.commands_run, 1);
    }
}
