//! Verification check runners.
//!
//! Each runner executes one configured shell command against the workspace
//! and normalizes the result to pass/fail plus diagnostic output.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use drydock_types::{CheckKind, CheckOutcome, DrydockError};

/// Run one check command in the workspace.
///
/// `passed` reflects the command's exit status; stdout and stderr are
/// combined into the diagnostic output. Failure to spawn the command at
/// all is a verification-machinery error, not a failing check.
pub async fn run_check(
    kind: CheckKind,
    command: &str,
    workspace: &Path,
) -> Result<CheckOutcome, DrydockError> {
    tracing::debug!(%kind, command, workspace = %workspace.display(), "running check");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            DrydockError::VerificationFailure(format!("failed to run {kind} command: {e}"))
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    let passed = output.status.success();
    tracing::info!(%kind, passed, "check finished");
    Ok(CheckOutcome {
        kind,
        passed,
        output: text,
    })
}
