//! The verify loop: sequential checks with bounded automatic correction.

use std::future::Future;
use std::path::Path;

use drydock_types::{CheckOutcome, DrydockError, VerifyConfig, VerifyResult};

use crate::runner::run_check;

/// Per-check diagnostic cap inside a fix prompt.
const MAX_DIAGNOSTIC_BYTES: usize = 16 * 1024;

/// Run the configured checks, re-invoking the agent to fix failures.
///
/// Checks run sequentially in configuration order -- later checks assume
/// earlier ones left the tree in a known state. On failure a single fix
/// prompt concatenating every failing check's diagnostics is passed to
/// `reinvoke` (a fresh agent invocation inside the same environment), up to
/// `max_fix_attempts` times total across the whole run. The attempt count
/// is carried in the loop state, so the bound holds for any failure
/// pattern. An error from `reinvoke` aborts the loop.
pub async fn run_verification<F, Fut>(
    config: &VerifyConfig,
    workspace: &Path,
    mut reinvoke: F,
) -> Result<VerifyResult, DrydockError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), DrydockError>>,
{
    let max_attempts = config.max_fix_attempts;
    let mut attempt: u32 = 0;

    loop {
        let mut checks = Vec::new();
        for (kind, command) in config.checks() {
            checks.push(run_check(kind, command, workspace).await?);
        }

        let failing: Vec<&CheckOutcome> = checks.iter().filter(|c| !c.passed).collect();
        if failing.is_empty() || attempt >= max_attempts {
            return Ok(VerifyResult {
                checks,
                fix_attempts_used: attempt,
            });
        }

        let prompt = build_fix_prompt(&failing);
        tracing::info!(
            attempt = attempt + 1,
            max_attempts,
            failing = failing.len(),
            "checks failed, re-invoking agent"
        );
        reinvoke(prompt).await?;
        attempt += 1;
    }
}

/// One prompt covering all failing checks, each under its own heading.
pub fn build_fix_prompt(failing: &[&CheckOutcome]) -> String {
    let mut prompt = String::from(
        "The following verification checks failed. Fix the underlying issues \
         without changing unrelated behavior.\n",
    );
    for check in failing {
        prompt.push_str(&format!("\n## {} check failed\n", check.kind));
        prompt.push_str(truncated(&check.output));
        if !prompt.ends_with('\n') {
            prompt.push('\n');
        }
    }
    prompt
}

fn truncated(output: &str) -> &str {
    if output.len() <= MAX_DIAGNOSTIC_BYTES {
        return output;
    }
    // Back off to a character boundary.
    let mut end = MAX_DIAGNOSTIC_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    &output[..end]
}
