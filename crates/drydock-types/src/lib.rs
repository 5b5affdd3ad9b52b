//! Core types shared across all Drydock crates.
//!
//! Defines run requests, security/execution modes, agent events, run
//! records, verification types, configuration, and error types used by the
//! policy engine, stream parser, container runtime, verifier, and run
//! lifecycle manager.

pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod request;
pub mod verify;

pub use config::OrchestratorConfig;
pub use error::DrydockError;
pub use event::{AgentEvent, CompletionSummary, FileAction, TestCounts, TokenUsage};
pub use record::{ArtifactPaths, Progress, RunRecord, RunState};
pub use request::{ExecutionMode, RunRequest, SecurityMode};
pub use verify::{CheckKind, CheckOutcome, VerifyConfig, VerifyResult};
