//! Security policy resolution.
//!
//! Maps a declared [`SecurityMode`] to concrete environment permissions:
//! workspace mount mode, write workflow, network access, and whether the
//! caller must confirm before execution. Pure logic with no side effects;
//! the container runtime applies the result and carries no policy of its
//! own.

use std::fmt;

use serde::{Deserialize, Serialize};

use drydock_types::{DrydockError, ExecutionMode, SecurityMode};

/// Mount permission for the workspace bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    /// The mount-option string the container engine expects.
    pub fn as_flag(&self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

/// How agent writes reach the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteWorkflow {
    /// Writes land in the workspace directly.
    Direct,
    /// Writes are staged as a reviewable patch; the workspace is untouched.
    StagedPatch,
}

/// The resolved permission set for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub workspace_mount: MountMode,
    pub write_workflow: WriteWorkflow,
    pub network_allowed: bool,
    pub requires_confirmation: bool,
}

/// Resolve a security mode to its permission set.
///
/// Pure and total over the enum: calling it twice with the same mode yields
/// identical output.
pub fn resolve(mode: SecurityMode) -> ResolvedPolicy {
    match mode {
        SecurityMode::ReadOnly => ResolvedPolicy {
            workspace_mount: MountMode::ReadOnly,
            write_workflow: WriteWorkflow::StagedPatch,
            network_allowed: false,
            requires_confirmation: false,
        },
        SecurityMode::WorkspaceWrite => ResolvedPolicy {
            workspace_mount: MountMode::ReadWrite,
            write_workflow: WriteWorkflow::Direct,
            network_allowed: false,
            requires_confirmation: false,
        },
        SecurityMode::FullAccess => ResolvedPolicy {
            workspace_mount: MountMode::ReadWrite,
            write_workflow: WriteWorkflow::Direct,
            network_allowed: true,
            requires_confirmation: true,
        },
    }
}

/// Resolve a security mode under an execution mode.
///
/// `SuggestOnly` forces the staged-patch workflow regardless of the
/// security mode's own write workflow.
pub fn resolve_for(mode: SecurityMode, execution: ExecutionMode) -> ResolvedPolicy {
    let mut policy = resolve(mode);
    if execution == ExecutionMode::SuggestOnly {
        policy.write_workflow = WriteWorkflow::StagedPatch;
    }
    policy
}

/// Reject `FullAccess` runs the caller has not confirmed.
///
/// This is a fatal precondition checked before any environment is created,
/// not a retryable error.
pub fn enforce_confirmation(mode: SecurityMode, confirmed: bool) -> Result<(), DrydockError> {
    let policy = resolve(mode);
    if policy.requires_confirmation && !confirmed {
        tracing::warn!(%mode, "rejecting unconfirmed run");
        return Err(DrydockError::ConfigError(format!(
            "security mode '{mode}' requires explicit caller confirmation"
        )));
    }
    Ok(())
}
