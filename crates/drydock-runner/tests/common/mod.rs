//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use drydock_runner::RunManager;
use drydock_sandbox::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ExecOutput, OutputStream,
};
use drydock_types::{
    DrydockError, ExecutionMode, OrchestratorConfig, RunRecord, RunRequest, SecurityMode,
};

/// Thread-safe inner state for [`MockRuntime`].
#[derive(Debug, Default)]
struct MockRuntimeInner {
    created: Vec<ContainerSpec>,
    started: Vec<String>,
    stopped: Vec<String>,
    removed: Vec<String>,
    exec_calls: Vec<Vec<String>>,
    exec_results: VecDeque<ExecOutput>,
}

/// A scripted container runtime test double.
///
/// Records every call and replays a configured output stream and exit
/// code, so lifecycle tests run without a container engine.
#[derive(Debug)]
pub struct MockRuntime {
    inner: Arc<Mutex<MockRuntimeInner>>,
    output: Vec<u8>,
    exit_code: i32,
    wait_forever: bool,
    wait_delay: Duration,
}

impl MockRuntime {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockRuntimeInner> {
        self.inner.lock().expect("mock runtime lock poisoned")
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.lock().created.clone()
    }

    pub fn create_count(&self) -> usize {
        self.lock().created.len()
    }

    pub fn remove_count(&self) -> usize {
        self.lock().removed.len()
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stopped.len()
    }

    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.lock().exec_calls.clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, DrydockError> {
        let mut inner = self.lock();
        inner.created.push(spec.clone());
        Ok(ContainerHandle {
            id: format!("mock-{}", inner.created.len()),
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), DrydockError> {
        self.lock().started.push(handle.id.clone());
        Ok(())
    }

    async fn stream_output(&self, _handle: &ContainerHandle) -> Result<OutputStream, DrydockError> {
        Ok(Box::new(std::io::Cursor::new(self.output.clone())))
    }

    async fn wait(&self, _handle: &ContainerHandle) -> Result<i32, DrydockError> {
        if self.wait_forever {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else {
            tokio::time::sleep(self.wait_delay).await;
        }
        Ok(self.exit_code)
    }

    async fn exec(
        &self,
        _handle: &ContainerHandle,
        command: &[String],
    ) -> Result<ExecOutput, DrydockError> {
        let mut inner = self.lock();
        inner.exec_calls.push(command.to_vec());
        Ok(inner.exec_results.pop_front().unwrap_or_default())
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<(), DrydockError> {
        self.lock().stopped.push(handle.id.clone());
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), DrydockError> {
        self.lock().removed.push(handle.id.clone());
        Ok(())
    }

    async fn copy_out(
        &self,
        _handle: &ContainerHandle,
        path: &Path,
    ) -> Result<Vec<u8>, DrydockError> {
        Err(DrydockError::EnvironmentError(format!(
            "mock runtime has no file {}",
            path.display()
        )))
    }
}

/// Fluent builder for [`MockRuntime`].
pub struct MockRuntimeBuilder {
    output: Vec<u8>,
    exit_code: i32,
    wait_forever: bool,
    wait_delay: Duration,
    exec_results: VecDeque<ExecOutput>,
}

impl MockRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            exit_code: 0,
            wait_forever: false,
            wait_delay: Duration::from_millis(50),
            exec_results: VecDeque::new(),
        }
    }

    /// Append one raw line to the scripted output stream.
    pub fn with_line(mut self, line: &str) -> Self {
        self.output.extend_from_slice(line.as_bytes());
        self.output.push(b'\n');
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// The agent process never exits on its own (for timeout/cancel tests).
    pub fn with_wait_forever(mut self) -> Self {
        self.wait_forever = true;
        self
    }

    /// Queue the result of the next `exec` call.
    pub fn with_exec_result(mut self, result: ExecOutput) -> Self {
        self.exec_results.push_back(result);
        self
    }

    pub fn build(self) -> Arc<MockRuntime> {
        Arc::new(MockRuntime {
            inner: Arc::new(Mutex::new(MockRuntimeInner {
                exec_results: self.exec_results,
                ..MockRuntimeInner::default()
            })),
            output: self.output,
            exit_code: self.exit_code,
            wait_forever: self.wait_forever,
            wait_delay: self.wait_delay,
        })
    }
}

impl Default for MockRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrator config pointing at temp directories.
pub fn test_config(artifacts_dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        agent_command: vec!["agent".into(), "exec".into()],
        image: "drydock-test:latest".into(),
        artifacts_dir: artifacts_dir.to_path_buf(),
        contracts_dir: None,
        user: None,
        stop_grace_secs: 1,
        event_channel_capacity: 16,
        container_workdir: "/workspace".into(),
    }
}

/// A basic request against the given workspace.
pub fn test_request(workspace: &Path) -> RunRequest {
    RunRequest {
        instruction: "add a health endpoint".into(),
        execution_mode: ExecutionMode::Autonomous,
        workspace: workspace.to_path_buf(),
        working_subdir: None,
        timeout_secs: 30,
        security_mode: SecurityMode::WorkspaceWrite,
        confirmed: false,
        verify: None,
        output_contract: None,
        env: HashMap::new(),
    }
}

/// Poll the registry until the run reaches a terminal state.
pub async fn wait_for_terminal(manager: &RunManager, id: Uuid) -> RunRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(record) = manager.snapshot(id) {
            if record.is_terminal() {
                return record;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run {id} did not reach a terminal state in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A scripted stream ending in an explicit completion event.
pub fn completion_stream() -> Vec<&'static str> {
    vec![
        r#"{"type":"message_delta","text":"analyzing the workspace"}"#,
        r#"{"type":"file_change","path":"src/lib.rs","action":"modified","diff":"--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1,2 @@\n-fn old() {}\n+fn new() {}\n+fn extra() {}\n"}"#,
        r#"{"type":"command_run","command":"cargo check","exit_code":0,"stdout":"ok","stderr":"","duration_ms":900}"#,
        r#"{"type":"completion","payload":{"summary":"implemented the endpoint","changed_files":["src/lib.rs"]}}"#,
    ]
}
