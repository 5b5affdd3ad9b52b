//! Control surface for callers that submitted tasks asynchronously.
//!
//! Serializable command/response types plus a dispatcher over the run
//! manager. Status reads take a point-in-time snapshot of the run record;
//! they never touch the live environment.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use drydock_types::{
    ArtifactPaths, CompletionSummary, DrydockError, Progress, RunRequest, RunState,
};

use crate::diff::{parse_unified_diff, render, DiffFormat, DiffStats};
use crate::manager::RunManager;

/// A command sent to the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Submit a new run. Execution is asynchronous; the response carries
    /// the run id immediately.
    Submit { request: Box<RunRequest> },
    /// Get the current state and progress of a run.
    Status { run_id: Uuid },
    /// Cancel a non-terminal run.
    Cancel { run_id: Uuid },
    /// Get persisted artifact paths, optionally inlining content.
    Artifacts {
        run_id: Uuid,
        #[serde(default)]
        include_diff: bool,
        #[serde(default)]
        include_events: bool,
    },
    /// Get the run's diff, raw plus parsed stats.
    GitDiff { run_id: Uuid, format: DiffFormat },
}

/// Response to a control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Human-readable message.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Status of one run, from a registry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub run_id: Uuid,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Partial progress, present while the run is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Artifact paths and optionally inlined content for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsReport {
    pub run_id: Uuid,
    pub paths: ArtifactPaths,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CompletionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<String>,
}

/// A run's diff in the requested format plus parsed stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub run_id: Uuid,
    pub format: DiffFormat,
    pub stats: DiffStats,
    pub content: String,
}

/// The caller-facing operations, dispatched against the run manager.
pub struct ControlSurface {
    manager: RunManager,
}

impl ControlSurface {
    pub fn new(manager: RunManager) -> Self {
        Self { manager }
    }

    /// Submit a run; returns the new run id immediately.
    pub fn submit(&self, request: RunRequest) -> Result<Uuid, DrydockError> {
        self.manager.submit(request)
    }

    /// Status from the persisted record; progress counters are derived
    /// from the in-flight event buffer while the run is live.
    pub fn status(&self, run_id: Uuid) -> Result<StatusReport, DrydockError> {
        let record = self
            .manager
            .snapshot(run_id)
            .ok_or_else(|| DrydockError::ConfigError(format!("unknown run {run_id}")))?;
        let progress = matches!(record.state, RunState::Running | RunState::Verifying)
            .then(|| record.progress());
        Ok(StatusReport {
            run_id,
            state: record.state,
            exit_code: record.exit_code,
            progress,
            reason: record.reason,
        })
    }

    /// Cancel a run; a no-op success on already-terminal runs.
    pub fn cancel(&self, run_id: Uuid) -> Result<RunState, DrydockError> {
        self.manager.cancel(run_id)
    }

    /// Artifact paths, with content inlined on request.
    pub fn artifacts(
        &self,
        run_id: Uuid,
        include_diff: bool,
        include_events: bool,
    ) -> Result<ArtifactsReport, DrydockError> {
        let record = self
            .manager
            .snapshot(run_id)
            .ok_or_else(|| DrydockError::ConfigError(format!("unknown run {run_id}")))?;

        let diff = match (&record.artifacts.patch, include_diff) {
            (Some(path), true) => Some(self.manager.store().read_text(path)?),
            _ => None,
        };
        let events = match (&record.artifacts.events, include_events) {
            (Some(path), true) => Some(self.manager.store().read_text(path)?),
            _ => None,
        };

        Ok(ArtifactsReport {
            run_id,
            paths: record.artifacts,
            summary: record.summary,
            diff,
            events,
        })
    }

    /// The run's diff, rendered in the requested format with parsed stats.
    pub fn git_diff(&self, run_id: Uuid, format: DiffFormat) -> Result<DiffReport, DrydockError> {
        let record = self
            .manager
            .snapshot(run_id)
            .ok_or_else(|| DrydockError::ConfigError(format!("unknown run {run_id}")))?;
        let path = record.artifacts.patch.ok_or_else(|| {
            DrydockError::StorageError(format!("run {run_id} has no diff artifact"))
        })?;
        let raw = self.manager.store().read_text(&path)?;
        let stats = parse_unified_diff(&raw);
        let content = render(&raw, &stats, format);
        Ok(DiffReport {
            run_id,
            format,
            stats,
            content,
        })
    }

    /// Dispatch a serialized control command.
    pub fn handle(&self, command: ControlCommand) -> ControlResponse {
        match command {
            ControlCommand::Submit { request } => match self.submit(*request) {
                Ok(run_id) => ControlResponse::ok_with_data(
                    "run accepted",
                    json!({ "run_id": run_id, "status": "accepted" }),
                ),
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::Status { run_id } => match self.status(run_id) {
                Ok(report) => respond_with("status", &report),
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::Cancel { run_id } => match self.cancel(run_id) {
                Ok(state) => ControlResponse::ok_with_data(
                    format!("run is {state}"),
                    json!({ "run_id": run_id, "state": state }),
                ),
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::Artifacts {
                run_id,
                include_diff,
                include_events,
            } => match self.artifacts(run_id, include_diff, include_events) {
                Ok(report) => respond_with("artifacts", &report),
                Err(e) => ControlResponse::error(e.to_string()),
            },
            ControlCommand::GitDiff { run_id, format } => match self.git_diff(run_id, format) {
                Ok(report) => respond_with("diff", &report),
                Err(e) => ControlResponse::error(e.to_string()),
            },
        }
    }
}

fn respond_with<T: Serialize>(what: &str, value: &T) -> ControlResponse {
    match serde_json::to_value(value) {
        Ok(data) => ControlResponse::ok_with_data(what, data),
        Err(e) => ControlResponse::error(format!("failed to serialize {what}: {e}")),
    }
}
