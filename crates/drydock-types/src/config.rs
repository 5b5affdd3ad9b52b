//! Orchestrator configuration with file and environment sources.
//!
//! Values merge in priority order: built-in defaults, then a TOML config
//! file, then `DRYDOCK_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DrydockError;

/// Maximum config file size in bytes. Larger files are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

fn default_agent_command() -> Vec<String> {
    vec!["agent".into(), "exec".into(), "--json".into()]
}

fn default_image() -> String {
    "drydock-agent:latest".into()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(".drydock/runs")
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_container_workdir() -> String {
    "/workspace".into()
}

/// Static orchestrator configuration, shared by every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Command vector that launches the agent inside the environment; the
    /// task instruction is appended as the final argument.
    #[serde(default = "default_agent_command")]
    pub agent_command: Vec<String>,
    /// Container image the agent runs in.
    #[serde(default = "default_image")]
    pub image: String,
    /// Root directory for persisted run artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Directory holding named output-contract schemas, if any.
    #[serde(default)]
    pub contracts_dir: Option<PathBuf>,
    /// Container user, e.g. `1000:1000`. `None` uses the image default.
    #[serde(default)]
    pub user: Option<String>,
    /// Grace period given to `stop` before the environment is force-removed.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Capacity of the bounded channel between the output reader and the
    /// event consumer.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Mount point of the workspace inside the container.
    #[serde(default = "default_container_workdir")]
    pub container_workdir: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_command: default_agent_command(),
            image: default_image(),
            artifacts_dir: default_artifacts_dir(),
            contracts_dir: None,
            user: None,
            stop_grace_secs: default_stop_grace_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            container_workdir: default_container_workdir(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, then apply `DRYDOCK_*`
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DrydockError> {
        let mut config = if path.exists() {
            let meta = std::fs::metadata(path)
                .map_err(|e| DrydockError::ConfigError(format!("failed to stat config: {e}")))?;
            if meta.len() > MAX_CONFIG_FILE_SIZE {
                return Err(DrydockError::ConfigError(format!(
                    "config file {} exceeds {MAX_CONFIG_FILE_SIZE} bytes",
                    path.display()
                )));
            }
            let text = std::fs::read_to_string(path)
                .map_err(|e| DrydockError::ConfigError(format!("failed to read config: {e}")))?;
            toml::from_str(&text).map_err(|e| {
                DrydockError::ConfigError(format!("invalid config {}: {e}", path.display()))
            })?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `DRYDOCK_*` environment overrides in place.
    fn apply_env_overrides(&mut self) {
        if let Ok(image) = std::env::var("DRYDOCK_IMAGE") {
            if !image.is_empty() {
                self.image = image;
            }
        }
        if let Ok(dir) = std::env::var("DRYDOCK_ARTIFACTS_DIR") {
            if !dir.is_empty() {
                self.artifacts_dir = PathBuf::from(dir);
            }
        }
        if let Ok(grace) = std::env::var("DRYDOCK_STOP_GRACE_SECS") {
            match grace.parse::<u64>() {
                Ok(secs) => self.stop_grace_secs = secs,
                Err(e) => {
                    tracing::warn!(value = %grace, error = %e, "ignoring bad DRYDOCK_STOP_GRACE_SECS")
                }
            }
        }
    }
}
