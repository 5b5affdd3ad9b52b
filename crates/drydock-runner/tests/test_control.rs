//! Integration tests for the control surface.

mod common;

use common::{completion_stream, test_config, test_request, wait_for_terminal, MockRuntimeBuilder};
use drydock_runner::{ControlCommand, ControlSurface, DiffFormat, RunManager};
use drydock_types::{RunState, SecurityMode};
use uuid::Uuid;

async fn finished_surface() -> (ControlSurface, RunManager, Uuid, tempfile::TempDir, tempfile::TempDir) {
    let workspace = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let mut builder = MockRuntimeBuilder::new();
    for line in completion_stream() {
        builder = builder.with_line(line);
    }
    let runtime = builder.build();
    let manager = RunManager::new(test_config(artifacts.path()), runtime);
    let surface = ControlSurface::new(manager.clone());

    // Read-only: the patch artifact comes from the agent's staged diffs,
    // so the test needs no git repository.
    let mut request = test_request(workspace.path());
    request.security_mode = SecurityMode::ReadOnly;
    let id = surface.submit(request).unwrap();
    wait_for_terminal(&manager, id).await;
    (surface, manager, id, workspace, artifacts)
}

#[tokio::test]
async fn status_reports_the_terminal_state() {
    let (surface, _manager, id, _ws, _art) = finished_surface().await;

    let report = surface.status(id).unwrap();
    assert_eq!(report.state, RunState::Succeeded);
    assert_eq!(report.exit_code, Some(0));
    // Terminal runs report no in-flight progress.
    assert!(report.progress.is_none());
}

#[tokio::test]
async fn status_of_unknown_run_is_an_error() {
    let (surface, _manager, _id, _ws, _art) = finished_surface().await;
    assert!(surface.status(Uuid::new_v4()).is_err());
}

#[tokio::test]
async fn artifacts_inline_content_on_request() {
    let (surface, _manager, id, _ws, _art) = finished_surface().await;

    let bare = surface.artifacts(id, false, false).unwrap();
    assert!(bare.diff.is_none());
    assert!(bare.events.is_none());
    assert!(bare.paths.log.is_some());
    assert_eq!(bare.summary.unwrap().summary, "implemented the endpoint");

    let full = surface.artifacts(id, true, true).unwrap();
    let diff = full.diff.expect("diff should be inlined");
    assert!(diff.contains("+fn new() {}"));
    let events = full.events.expect("events should be inlined");
    assert_eq!(events.lines().count(), 4);
}

#[tokio::test]
async fn git_diff_parses_stats_from_the_staged_patch() {
    let (surface, _manager, id, _ws, _art) = finished_surface().await;

    let report = surface.git_diff(id, DiffFormat::Stat).unwrap();
    assert_eq!(report.stats.files_changed, 1);
    assert_eq!(report.stats.insertions, 2);
    assert_eq!(report.stats.deletions, 1);
    assert!(report.content.contains("src/lib.rs | +2 -1"));

    let names = surface.git_diff(id, DiffFormat::NameOnly).unwrap();
    assert_eq!(names.content, "src/lib.rs");
}

#[tokio::test]
async fn submit_command_returns_accepted_with_run_id() {
    let workspace = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let runtime = MockRuntimeBuilder::new()
        .with_line(r#"{"type":"completion","payload":{"summary":"done","changed_files":[]}}"#)
        .build();
    let manager = RunManager::new(test_config(artifacts.path()), runtime);
    let surface = ControlSurface::new(manager.clone());

    let response = surface.handle(ControlCommand::Submit {
        request: Box::new(test_request(workspace.path())),
    });
    assert!(response.ok);
    let data = response.data.unwrap();
    assert_eq!(data["status"], "accepted");
    let id: Uuid = serde_json::from_value(data["run_id"].clone()).unwrap();
    wait_for_terminal(&manager, id).await;
}

#[tokio::test]
async fn cancel_command_on_terminal_run_echoes_existing_state() {
    let (surface, _manager, id, _ws, _art) = finished_surface().await;

    let response = surface.handle(ControlCommand::Cancel { run_id: id });
    assert!(response.ok);
    assert_eq!(response.data.unwrap()["state"], "succeeded");
}

#[tokio::test]
async fn unknown_run_yields_an_error_response() {
    let (surface, _manager, _id, _ws, _art) = finished_surface().await;

    let response = surface.handle(ControlCommand::Status {
        run_id: Uuid::new_v4(),
    });
    assert!(!response.ok);
    assert!(response.message.contains("unknown run"));
}
