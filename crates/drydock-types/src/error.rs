//! Error types shared across all Drydock crates.

/// Errors that can occur across the Drydock orchestrator.
///
/// Each variant corresponds to a failure class from a different subsystem:
/// request/configuration validation, the isolation backend, the agent event
/// protocol, completion-contract validation, verification, and artifact
/// storage.
///
/// Timed-out and cancelled runs are terminal [`RunState`]s rather than
/// errors: a caller must be able to distinguish "the task failed" from
/// "the task was stopped", so neither is folded into this enum.
///
/// [`RunState`]: crate::RunState
#[derive(Debug, thiserror::Error)]
pub enum DrydockError {
    /// Invalid security mode or malformed request. Rejected before any
    /// resource is allocated; never retried.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The isolation backend failed (engine unavailable, image missing,
    /// container operation rejected). Preserves the raw backend error.
    #[error("environment error: {0}")]
    EnvironmentError(String),

    /// A malformed event line. Recovered locally as an error event; only
    /// surfaced as this variant when the stream itself cannot be read.
    #[error("event protocol error: {0}")]
    ProtocolError(String),

    /// The completion payload failed its output contract. Degrades the
    /// result rather than failing the run.
    #[error("completion validation error: {0}")]
    ValidationError(String),

    /// Verification machinery could not run (not a failing check -- failing
    /// checks drive the fix-retry loop and are reported per check).
    #[error("verification error: {0}")]
    VerificationFailure(String),

    /// Artifact persistence failed.
    #[error("artifact storage error: {0}")]
    StorageError(String),
}
