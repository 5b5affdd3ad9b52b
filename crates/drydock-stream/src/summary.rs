//! Folding an event list into a completion summary.

use serde_json::Value;

use drydock_types::{AgentEvent, CompletionSummary};

/// Fold a run's events into its completion summary.
///
/// Takes the last `Completion` event's payload verbatim when one exists,
/// ignoring any earlier file-change or command events. Otherwise a summary
/// is synthesized from the accumulated `FileChange` and `CommandRun`
/// events -- the best-effort fallback for an agent that terminated without
/// an explicit completion event -- and marked `synthesized`.
pub fn extract_summary(events: &[AgentEvent]) -> CompletionSummary {
    let last_completion = events.iter().rev().find_map(|event| match event {
        AgentEvent::Completion { payload } => Some(payload),
        _ => None,
    });

    match last_completion {
        Some(payload) => summary_from_payload(payload),
        None => synthesize(events),
    }
}

/// Interpret a completion payload as a summary. A payload that is not even
/// object-shaped still yields a summary carrying its raw text.
fn summary_from_payload(payload: &Value) -> CompletionSummary {
    match serde_json::from_value(payload.clone()) {
        Ok(summary) => summary,
        Err(e) => {
            tracing::debug!(error = %e, "completion payload not summary-shaped");
            CompletionSummary {
                summary: payload.to_string(),
                ..CompletionSummary::default()
            }
        }
    }
}

fn synthesize(events: &[AgentEvent]) -> CompletionSummary {
    let mut changed_files = Vec::new();
    let mut commands = Vec::new();
    for event in events {
        match event {
            AgentEvent::FileChange { path, .. } => {
                if !changed_files.contains(path) {
                    changed_files.push(path.clone());
                }
            }
            AgentEvent::CommandRun { command, .. } => commands.push(command.clone()),
            _ => {}
        }
    }

    CompletionSummary {
        summary: format!(
            "agent exited without a completion event; {} file(s) changed, {} command(s) run",
            changed_files.len(),
            commands.len()
        ),
        changed_files,
        commands,
        synthesized: true,
        ..CompletionSummary::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_types::FileAction;
    use serde_json::json;

    fn file_change(path: &str) -> AgentEvent {
        AgentEvent::FileChange {
            path: path.into(),
            action: FileAction::Modified,
            diff: None,
        }
    }

    #[test]
    fn completion_payload_wins_over_earlier_events() {
        let events = vec![
            file_change("ignored.rs"),
            AgentEvent::CommandRun {
                command: "make".into(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 10,
            },
            AgentEvent::Completion {
                payload: json!({"summary": "rewrote the parser", "changed_files": ["src/parser.rs"]}),
            },
        ];
        let summary = extract_summary(&events);
        assert_eq!(summary.summary, "rewrote the parser");
        assert_eq!(summary.changed_files, vec!["src/parser.rs".to_string()]);
        assert!(!summary.synthesized);
    }

    #[test]
    fn last_of_several_completions_wins() {
        let events = vec![
            AgentEvent::Completion {
                payload: json!({"summary": "first", "changed_files": []}),
            },
            AgentEvent::Completion {
                payload: json!({"summary": "second", "changed_files": []}),
            },
        ];
        assert_eq!(extract_summary(&events).summary, "second");
    }

    #[test]
    fn synthesizes_from_file_changes_and_commands() {
        let events = vec![
            file_change("a.rs"),
            file_change("b.rs"),
            file_change("a.rs"), // duplicate path collapses
            AgentEvent::CommandRun {
                command: "cargo build".into(),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 40,
            },
        ];
        let summary = extract_summary(&events);
        assert!(summary.synthesized);
        assert_eq!(summary.changed_files, vec!["a.rs".to_string(), "b.rs".to_string()]);
        assert_eq!(summary.commands, vec!["cargo build".to_string()]);
    }

    #[test]
    fn empty_event_list_synthesizes_empty_summary() {
        let summary = extract_summary(&[]);
        assert!(summary.synthesized);
        assert!(summary.changed_files.is_empty());
    }

    #[test]
    fn non_object_payload_is_preserved_as_text() {
        let events = vec![AgentEvent::Completion {
            payload: json!("all done"),
        }];
        let summary = extract_summary(&events);
        assert!(summary.summary.contains("all done"));
        assert!(!summary.synthesized);
    }
}
