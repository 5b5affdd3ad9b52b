//! Per-run artifact persistence.
//!
//! Each run gets a run-scoped directory under the artifacts root holding
//! the request snapshot, final result snapshot, full event log (one
//! structured record per line), plain-text process log, and the patch file.
//! Every write passes through the secret masker. The per-run scratch
//! session directory is deliberately absent: it lives with the environment
//! and is destroyed with it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use drydock_types::{AgentEvent, ArtifactPaths, DrydockError, RunRecord, RunRequest};

use crate::redact::SecretMasker;

/// Persists run artifacts under a run-scoped directory.
pub struct ArtifactStore {
    root: PathBuf,
    masker: SecretMasker,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            masker: SecretMasker::new(),
        }
    }

    /// The directory holding one run's artifacts.
    pub fn run_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Write all artifacts for a finalized run. Returns the paths written.
    pub fn persist(
        &self,
        record: &RunRecord,
        request: &RunRequest,
        process_log: &str,
        patch: Option<&str>,
    ) -> Result<ArtifactPaths, DrydockError> {
        let dir = self.run_dir(record.id);
        std::fs::create_dir_all(&dir).map_err(|e| {
            DrydockError::StorageError(format!("failed to create {}: {e}", dir.display()))
        })?;

        let mut paths = ArtifactPaths::default();

        let request_path = dir.join("request.json");
        self.write_json(&request_path, request)?;
        paths.request = Some(request_path);

        let events_path = dir.join("events.ndjson");
        self.write_events(&events_path, &record.events)?;
        paths.events = Some(events_path);

        let log_path = dir.join("process.log");
        self.write_text(&log_path, process_log)?;
        paths.log = Some(log_path);

        if let Some(patch) = patch {
            let patch_path = dir.join("changes.patch");
            self.write_text(&patch_path, patch)?;
            paths.patch = Some(patch_path);
        }

        // The result snapshot goes last so it can reference the other paths.
        let mut result = record.clone();
        result.artifacts = paths.clone();
        let result_path = dir.join("result.json");
        self.write_json(&result_path, &result)?;
        paths.result = Some(result_path);

        tracing::debug!(run_id = %record.id, dir = %dir.display(), "artifacts persisted");
        Ok(paths)
    }

    /// Read a persisted artifact back as text.
    pub fn read_text(&self, path: &Path) -> Result<String, DrydockError> {
        std::fs::read_to_string(path).map_err(|e| {
            DrydockError::StorageError(format!("failed to read {}: {e}", path.display()))
        })
    }

    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), DrydockError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| DrydockError::StorageError(format!("serialize {}: {e}", path.display())))?;
        self.write_text(path, &json)
    }

    /// Append each event as one masked JSON line, flushing at the end so
    /// the bytes are visible to any later reader.
    fn write_events(&self, path: &Path, events: &[AgentEvent]) -> Result<(), DrydockError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| DrydockError::StorageError(format!("open {}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            let line = serde_json::to_string(event).map_err(|e| {
                DrydockError::StorageError(format!("serialize event: {e}"))
            })?;
            writer
                .write_all(self.masker.mask(&line).as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .map_err(|e| DrydockError::StorageError(format!("write {}: {e}", path.display())))?;
        }
        writer
            .flush()
            .map_err(|e| DrydockError::StorageError(format!("flush {}: {e}", path.display())))
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<(), DrydockError> {
        let masked = self.masker.mask(text);
        let mut file = File::create(path)
            .map_err(|e| DrydockError::StorageError(format!("create {}: {e}", path.display())))?;
        file.write_all(masked.as_bytes())
            .map_err(|e| DrydockError::StorageError(format!("write {}: {e}", path.display())))
    }
}
