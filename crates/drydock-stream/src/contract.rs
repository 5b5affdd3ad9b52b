//! Completion-contract validation.
//!
//! A contract is a named Draft-7 JSON Schema the agent's completion payload
//! must satisfy before it is trusted. Named contracts are loaded from a
//! contract directory (`<dir>/<name>.json`); a missing name falls back to
//! the built-in default contract, which requires at minimum a summary
//! string and a changed-files list.

use std::path::PathBuf;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use drydock_types::DrydockError;

/// Name resolved to the built-in contract when the caller names none.
pub const DEFAULT_CONTRACT_NAME: &str = "default";

/// Validates completion payloads against named contracts.
#[derive(Debug, Clone, Default)]
pub struct ContractValidator {
    contracts_dir: Option<PathBuf>,
}

impl ContractValidator {
    pub fn new(contracts_dir: Option<PathBuf>) -> Self {
        Self { contracts_dir }
    }

    /// Validate `payload` against the named contract.
    ///
    /// Failure does not fail the run; the caller records a degraded,
    /// unvalidated completion instead.
    pub fn validate(&self, payload: &Value, contract: Option<&str>) -> Result<(), DrydockError> {
        let name = contract.unwrap_or(DEFAULT_CONTRACT_NAME);
        let schema = self.load(name)?;
        let compiled = compile(schema)?;

        let errors: Vec<String> = match compiled.validate(payload) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|e| format!("{}: {e}", e.instance_path))
                .collect(),
        };
        Err(DrydockError::ValidationError(format!(
            "payload violates contract '{name}': {}",
            errors.join("; ")
        )))
    }

    /// Load a named contract, falling back to the built-in default when no
    /// file for the name exists.
    fn load(&self, name: &str) -> Result<Value, DrydockError> {
        if let Some(dir) = &self.contracts_dir {
            let path = dir.join(format!("{name}.json"));
            if path.exists() {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    DrydockError::ValidationError(format!(
                        "failed to read contract {}: {e}",
                        path.display()
                    ))
                })?;
                return serde_json::from_str(&text).map_err(|e| {
                    DrydockError::ValidationError(format!(
                        "contract {} is not valid JSON: {e}",
                        path.display()
                    ))
                });
            }
            tracing::debug!(contract = name, dir = %dir.display(), "contract not found, using built-in default");
        }
        Ok(default_contract())
    }
}

/// The built-in default contract: a summary string plus a changed-files
/// list, the minimum a completion must self-report.
fn default_contract() -> Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["summary", "changed_files"],
        "properties": {
            "summary": { "type": "string", "minLength": 1 },
            "changed_files": {
                "type": "array",
                "items": { "type": "string" }
            }
        }
    })
}

fn compile(schema: Value) -> Result<JSONSchema, DrydockError> {
    // The compiled schema borrows the document, so give it a static one.
    // Contracts are compiled once per run; the leak is a handful of bytes.
    let schema: &'static Value = Box::leak(Box::new(schema));
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| DrydockError::ValidationError(format!("contract does not compile: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_contract_accepts_minimal_payload() {
        let validator = ContractValidator::new(None);
        let payload = json!({"summary": "done", "changed_files": []});
        assert!(validator.validate(&payload, None).is_ok());
    }

    #[test]
    fn default_contract_rejects_missing_summary() {
        let validator = ContractValidator::new(None);
        let payload = json!({"changed_files": ["a.rs"]});
        let err = validator.validate(&payload, None).unwrap_err();
        assert!(matches!(err, DrydockError::ValidationError(_)));
    }

    #[test]
    fn default_contract_rejects_empty_summary() {
        let validator = ContractValidator::new(None);
        let payload = json!({"summary": "", "changed_files": []});
        assert!(validator.validate(&payload, None).is_err());
    }

    #[test]
    fn named_contract_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("strict.json"),
            r#"{
                "type": "object",
                "required": ["summary", "changed_files", "tests"],
                "properties": { "tests": { "type": "object" } }
            }"#,
        )
        .unwrap();

        let validator = ContractValidator::new(Some(dir.path().to_path_buf()));
        let minimal = json!({"summary": "done", "changed_files": []});
        assert!(validator.validate(&minimal, Some("strict")).is_err());

        let full = json!({"summary": "done", "changed_files": [], "tests": {"passed": 3, "failed": 0}});
        assert!(validator.validate(&full, Some("strict")).is_ok());
    }

    #[test]
    fn unknown_contract_name_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let validator = ContractValidator::new(Some(dir.path().to_path_buf()));
        let payload = json!({"summary": "done", "changed_files": []});
        assert!(validator.validate(&payload, Some("no-such-contract")).is_ok());
    }

    #[test]
    fn synthesized_summary_passes_the_default_contract() {
        // The fallback summary the stream crate synthesizes must be
        // acceptable to the default contract, so a run without a
        // completion event degrades instead of failing.
        let summary = crate::summary::extract_summary(&[]);
        let payload = serde_json::to_value(&summary).unwrap();
        let validator = ContractValidator::new(None);
        assert!(validator.validate(&payload, None).is_ok());
    }
}
