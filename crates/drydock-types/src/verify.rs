//! Verification configuration and results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which checks to run against the workspace after the agent finishes.
///
/// Each field holds the shell command for that check; `None` skips it.
/// Checks run sequentially in test, lint, build order -- later checks
/// assume earlier ones left the tree in a known state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub lint: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    /// Total fix-retry budget across the whole run, not per check.
    #[serde(default)]
    pub max_fix_attempts: u32,
}

impl VerifyConfig {
    /// Configured checks in execution order.
    pub fn checks(&self) -> Vec<(CheckKind, &str)> {
        let mut out = Vec::new();
        if let Some(cmd) = self.test.as_deref() {
            out.push((CheckKind::Test, cmd));
        }
        if let Some(cmd) = self.lint.as_deref() {
            out.push((CheckKind::Lint, cmd));
        }
        if let Some(cmd) = self.build.as_deref() {
            out.push((CheckKind::Build, cmd));
        }
        out
    }

    /// True when no check is configured.
    pub fn is_empty(&self) -> bool {
        self.test.is_none() && self.lint.is_none() && self.build.is_none()
    }
}

/// The kind of a verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Test,
    Lint,
    Build,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Test => write!(f, "test"),
            CheckKind::Lint => write!(f, "lint"),
            CheckKind::Build => write!(f, "build"),
        }
    }
}

/// Outcome of one check run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub passed: bool,
    /// Combined stdout and stderr of the check command.
    pub output: String,
}

/// Aggregated verification outcome for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Outcome of each configured check, in execution order, from the
    /// final verification pass.
    pub checks: Vec<CheckOutcome>,
    /// How many agent fix re-invocations were actually used.
    pub fix_attempts_used: u32,
}

impl VerifyResult {
    /// True when every configured check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// The checks that failed on the final pass.
    pub fn failing(&self) -> Vec<&CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}
