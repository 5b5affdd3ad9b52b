//! Run requests and the declared modes that govern them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DrydockError;
use crate::verify::VerifyConfig;

/// Declared trust level for a run.
///
/// Determines the workspace mount permission, whether writes are applied
/// directly or staged as a reviewable patch, whether outbound network access
/// is permitted, and whether explicit caller confirmation is mandatory
/// before execution (`FullAccess` only). The mapping itself lives in the
/// policy engine; this type is just the closed set of modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Workspace mounted read-only; changes are staged as a patch.
    ReadOnly,
    /// Workspace mounted read-write; changes applied directly, no network.
    WorkspaceWrite,
    /// Read-write workspace plus network. Requires caller confirmation.
    FullAccess,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::ReadOnly => write!(f, "read_only"),
            SecurityMode::WorkspaceWrite => write!(f, "workspace_write"),
            SecurityMode::FullAccess => write!(f, "full_access"),
        }
    }
}

impl FromStr for SecurityMode {
    type Err = DrydockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_only" => Ok(SecurityMode::ReadOnly),
            "workspace_write" => Ok(SecurityMode::WorkspaceWrite),
            "full_access" => Ok(SecurityMode::FullAccess),
            other => Err(DrydockError::ConfigError(format!(
                "unrecognized security mode '{other}' (expected read_only, \
                 workspace_write, or full_access)"
            ))),
        }
    }
}

/// How the agent is expected to act on the task.
///
/// Recorded on the request and exported to the agent environment.
/// `SuggestOnly` additionally forces the staged-patch write workflow
/// regardless of security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The agent applies changes without asking.
    Autonomous,
    /// The agent proposes changes as a patch but never applies them.
    SuggestOnly,
    /// The agent is expected to ask before each change.
    InteractiveConfirm,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Autonomous => write!(f, "autonomous"),
            ExecutionMode::SuggestOnly => write!(f, "suggest_only"),
            ExecutionMode::InteractiveConfirm => write!(f, "interactive_confirm"),
        }
    }
}

/// A caller-submitted task. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Natural-language task instruction passed to the agent.
    pub instruction: String,
    /// How the agent should act on the task.
    pub execution_mode: ExecutionMode,
    /// Host path of the target workspace (mounted into the environment).
    pub workspace: PathBuf,
    /// Working subdirectory, relative to the workspace root.
    #[serde(default)]
    pub working_subdir: Option<PathBuf>,
    /// Wall-clock budget for the whole run, in seconds. Must be > 0.
    pub timeout_secs: u64,
    /// Declared trust level.
    pub security_mode: SecurityMode,
    /// Caller confirmation flag. Mandatory for `FullAccess`.
    #[serde(default)]
    pub confirmed: bool,
    /// Which checks to run after the agent finishes, if any.
    #[serde(default)]
    pub verify: Option<VerifyConfig>,
    /// Named output contract the completion payload must satisfy.
    #[serde(default)]
    pub output_contract: Option<String>,
    /// Extra environment variables for the agent process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl RunRequest {
    /// Validate the request before any resource is allocated.
    ///
    /// Rejections here are `ConfigError`s: fatal, never retried, and
    /// guaranteed to happen before an environment exists.
    pub fn validate(&self) -> Result<(), DrydockError> {
        if self.instruction.trim().is_empty() {
            return Err(DrydockError::ConfigError(
                "task instruction must not be empty".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(DrydockError::ConfigError(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.workspace.as_os_str().is_empty() {
            return Err(DrydockError::ConfigError(
                "workspace path must not be empty".into(),
            ));
        }
        if let Some(subdir) = &self.working_subdir {
            validate_subdir(subdir)?;
        }
        Ok(())
    }

    /// The run's wall-clock budget as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The working directory on the host: workspace joined with the
    /// validated subdirectory.
    pub fn working_dir(&self) -> PathBuf {
        match &self.working_subdir {
            Some(subdir) => self.workspace.join(subdir),
            None => self.workspace.clone(),
        }
    }
}

/// Reject subdirectories that would escape the workspace.
fn validate_subdir(subdir: &Path) -> Result<(), DrydockError> {
    if subdir.is_absolute() {
        return Err(DrydockError::ConfigError(format!(
            "working subdirectory must be relative, got '{}'",
            subdir.display()
        )));
    }
    for component in subdir.components() {
        if matches!(component, Component::ParentDir) {
            return Err(DrydockError::ConfigError(format!(
                "working subdirectory '{}' contains a '..' traversal component",
                subdir.display()
            )));
        }
    }
    if subdir.to_string_lossy().contains('\0') {
        return Err(DrydockError::ConfigError(
            "working subdirectory contains a null byte".into(),
        ));
    }
    Ok(())
}
