//! The run lifecycle manager.
//!
//! Owns the run state machine and composes the policy engine, container
//! runtime, event-stream parser, contract validator, verify loop, and
//! artifact store. One submitted request becomes one tokio task; multiple
//! runs proceed fully in parallel with no shared mutable state between them
//! except the run registry.
//!
//! Within a run, three concerns race: the agent process lifetime, the
//! incremental event-stream consumption, and the timeout timer. A dedicated
//! reader drains the output stream into a bounded channel so a full pipe
//! buffer can never deadlock exit detection. Whichever of process exit,
//! timeout, or cancellation resolves first determines the transition.
//!
//! Every terminal path tears the environment down (stop, then idempotent
//! remove) and persists artifacts; teardown failure is logged, never
//! escalated into the run's reported outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use drydock_policy::{MountMode, ResolvedPolicy, WriteWorkflow};
use drydock_sandbox::{ContainerHandle, ContainerRuntime, ContainerSpec, Mount};
use drydock_stream::{extract_summary, ContractValidator, EventParser};
use drydock_types::{
    AgentEvent, DrydockError, OrchestratorConfig, RunRecord, RunRequest, RunState,
};
use drydock_verify::run_verification;

use crate::artifacts::ArtifactStore;
use crate::registry::RunRegistry;

/// Where the per-run scratch session directory is mounted.
const SESSION_MOUNT: &str = "/session";

/// How long after process exit the output stream is drained before the run
/// is finalized without it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Terminal outcome of a run task.
#[derive(Debug)]
struct Outcome {
    state: RunState,
    reason: String,
}

impl Outcome {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: RunState::Failed,
            reason: reason.into(),
        }
    }
}

/// Per-run resources that must survive until finalization.
#[derive(Default)]
struct RunContext {
    handle: Option<ContainerHandle>,
    /// Scratch credentials/session directory. Dropped (deleted) with the
    /// environment; never copied into artifacts.
    session_dir: Option<tempfile::TempDir>,
    /// Raw process output, accumulated for the process log artifact.
    raw_log: Arc<StdMutex<String>>,
}

impl RunContext {
    fn append_log(&self, text: &str) {
        if let Ok(mut log) = self.raw_log.lock() {
            log.push_str(text);
        }
    }
}

/// Orchestrates runs from submission to terminal state.
///
/// A cheap-clone handle: every field sits behind an `Arc`, so each run task
/// carries its own clone and the registry stays the only shared state.
#[derive(Clone)]
pub struct RunManager {
    config: Arc<OrchestratorConfig>,
    registry: Arc<RunRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<ArtifactStore>,
    validator: Arc<ContractValidator>,
    cancels: Arc<StdMutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl RunManager {
    pub fn new(config: OrchestratorConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let store = ArtifactStore::new(config.artifacts_dir.clone());
        let validator = ContractValidator::new(config.contracts_dir.clone());
        Self {
            config: Arc::new(config),
            registry: Arc::new(RunRegistry::new()),
            runtime,
            store: Arc::new(store),
            validator: Arc::new(validator),
            cancels: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        self.registry.as_ref()
    }

    pub fn store(&self) -> &ArtifactStore {
        self.store.as_ref()
    }

    /// Accept a request and start executing it asynchronously.
    ///
    /// Validation and the `FullAccess` confirmation gate happen here,
    /// before any resource is allocated; rejections are `ConfigError`s.
    pub fn submit(&self, request: RunRequest) -> Result<Uuid, DrydockError> {
        request.validate()?;
        drydock_policy::enforce_confirmation(request.security_mode, request.confirmed)?;

        let id = Uuid::new_v4();
        self.registry.insert(RunRecord::new(id));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.insert(id, cancel_tx);
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.drive(id, request, cancel_rx).await;
        });

        tracing::info!(run_id = %id, "run accepted");
        Ok(id)
    }

    /// Request cancellation.
    ///
    /// Valid only while non-terminal; on an already-terminal run this is a
    /// no-op success returning the existing terminal state unchanged.
    pub fn cancel(&self, id: Uuid) -> Result<RunState, DrydockError> {
        let record = self
            .registry
            .snapshot(id)
            .ok_or_else(|| DrydockError::ConfigError(format!("unknown run {id}")))?;
        if record.state.is_terminal() {
            return Ok(record.state);
        }
        if let Ok(cancels) = self.cancels.lock() {
            if let Some(tx) = cancels.get(&id) {
                let _ = tx.send(true);
            }
        }
        tracing::info!(run_id = %id, "cancellation requested");
        Ok(RunState::Cancelled)
    }

    /// Point-in-time copy of a run record.
    pub fn snapshot(&self, id: Uuid) -> Option<RunRecord> {
        self.registry.snapshot(id)
    }

    fn set_state(&self, id: Uuid, next: RunState) -> Result<(), DrydockError> {
        self.registry.update(id, |r| r.transition(next))?
    }

    /// Parse a chunk of agent output, appending decoded events to the
    /// record and the raw text to the process log.
    fn consume_chunk(&self, id: Uuid, parser: &mut EventParser, ctx: &RunContext, bytes: &[u8]) {
        ctx.append_log(&String::from_utf8_lossy(bytes));
        let events = parser.feed(bytes);
        self.append_events(id, events);
    }

    fn flush_parser(&self, id: Uuid, parser: &mut EventParser) {
        let events = parser.finish();
        self.append_events(id, events);
    }

    fn append_events(&self, id: Uuid, events: Vec<AgentEvent>) {
        if events.is_empty() {
            return;
        }
        if let Err(e) = self.registry.update(id, |r| r.events.extend(events)) {
            tracing::error!(run_id = %id, error = %e, "failed to append events");
        }
    }

    /// Run task body: execute, then always finalize.
    async fn drive(self, id: Uuid, request: RunRequest, cancel_rx: watch::Receiver<bool>) {
        let mut ctx = RunContext::default();
        let outcome = self.execute(id, &request, &mut ctx, cancel_rx).await;
        self.finalize(id, &request, ctx, outcome).await;
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.remove(&id);
        }
    }

    async fn execute(
        &self,
        id: Uuid,
        request: &RunRequest,
        ctx: &mut RunContext,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Outcome {
        // QUEUED -> STARTING: policy resolved, environment requested.
        let policy = drydock_policy::resolve_for(request.security_mode, request.execution_mode);
        if let Err(e) = self.set_state(id, RunState::Starting) {
            return Outcome::failed(format!("run record lost before start: {e}"));
        }

        let spec = match self.build_spec(request, &policy, ctx) {
            Ok(spec) => spec,
            Err(e) => return Outcome::failed(format!("environment could not be prepared: {e}")),
        };

        let handle = match self.runtime.create(&spec).await {
            Ok(handle) => handle,
            Err(e) => return Outcome::failed(format!("environment could not be created: {e}")),
        };
        ctx.handle = Some(handle.clone());
        if let Err(e) = self.registry.update(id, |r| r.container_id = Some(handle.id.clone())) {
            tracing::error!(run_id = %id, error = %e, "failed to record container id");
        }

        if let Err(e) = self.runtime.start(&handle).await {
            return Outcome::failed(format!("environment could not be started: {e}"));
        }

        // STARTING -> RUNNING: event consumption begins concurrently with
        // the timeout timer.
        if let Err(e) = self.set_state(id, RunState::Running) {
            return Outcome::failed(format!("run record lost after start: {e}"));
        }

        let stream = match self.runtime.stream_output(&handle).await {
            Ok(stream) => stream,
            Err(e) => return Outcome::failed(format!("environment output unavailable: {e}")),
        };

        // Dedicated reader: drains the pipe into a bounded channel so a
        // full buffer cannot deadlock exit detection. Channel close
        // signals stream end.
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.config.event_channel_capacity);
        tokio::spawn(async move {
            let mut stream = stream;
            let mut buf = vec![0u8; 8192];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "output stream read ended");
                        break;
                    }
                }
            }
        });

        let mut parser = EventParser::new();
        let timeout = tokio::time::sleep(request.timeout());
        tokio::pin!(timeout);
        let wait = self.runtime.wait(&handle);
        tokio::pin!(wait);
        let mut stream_open = true;

        // Race process exit, the timeout timer, and cancellation while
        // consuming events; whichever resolves first wins.
        let exit_code: i32 = loop {
            tokio::select! {
                chunk = rx.recv(), if stream_open => match chunk {
                    Some(bytes) => self.consume_chunk(id, &mut parser, ctx, &bytes),
                    None => stream_open = false,
                },
                result = &mut wait => match result {
                    Ok(code) => break code,
                    Err(e) => {
                        self.flush_parser(id, &mut parser);
                        return Outcome::failed(format!("environment wait failed: {e}"));
                    }
                },
                () = &mut timeout => {
                    self.flush_parser(id, &mut parser);
                    return Outcome {
                        state: RunState::TimedOut,
                        reason: format!("run exceeded its {}s timeout", request.timeout_secs),
                    };
                }
                _ = cancel_rx.changed() => {
                    self.flush_parser(id, &mut parser);
                    return Outcome {
                        state: RunState::Cancelled,
                        reason: "cancelled by caller".into(),
                    };
                }
            }
        };

        // The stream usually ends moments after the process; drain what is
        // left, bounded so a wedged pipe cannot stall finalization.
        let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
        tokio::pin!(drain_deadline);
        while stream_open {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(bytes) => self.consume_chunk(id, &mut parser, ctx, &bytes),
                    None => stream_open = false,
                },
                () = &mut drain_deadline => break,
            }
        }
        self.flush_parser(id, &mut parser);

        if let Err(e) = self.registry.update(id, |r| r.exit_code = Some(exit_code)) {
            tracing::error!(run_id = %id, error = %e, "failed to record exit code");
        }
        tracing::info!(run_id = %id, exit_code, "agent process exited");

        // Fold events into the completion summary and validate it. A
        // contract violation degrades the result; it never fails the run.
        let events = self
            .registry
            .snapshot(id)
            .map(|r| r.events)
            .unwrap_or_default();
        let summary = extract_summary(&events);
        let payload = serde_json::to_value(&summary).unwrap_or(serde_json::Value::Null);
        let validated = match self
            .validator
            .validate(&payload, request.output_contract.as_deref())
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(run_id = %id, error = %e, "completion summary unvalidated");
                false
            }
        };
        if let Err(e) = self.registry.update(id, |r| {
            r.summary = Some(summary);
            r.summary_validated = Some(validated);
        }) {
            tracing::error!(run_id = %id, error = %e, "failed to record summary");
        }

        if exit_code != 0 {
            // Nothing coherent to verify; surface the backend's reason
            // where the agent reported one.
            let last_error = events.iter().rev().find_map(|event| match event {
                AgentEvent::Error { message } => Some(message.clone()),
                _ => None,
            });
            let mut reason = format!("agent process exited with code {exit_code}");
            if let Some(message) = last_error {
                reason.push_str(": ");
                reason.push_str(&message);
            }
            return Outcome::failed(reason);
        }

        let Some(verify_config) = request.verify.clone().filter(|v| !v.is_empty()) else {
            return Outcome {
                state: RunState::Succeeded,
                reason: "agent completed".into(),
            };
        };

        // RUNNING -> VERIFYING.
        if let Err(e) = self.set_state(id, RunState::Verifying) {
            return Outcome::failed(format!("run record lost before verification: {e}"));
        }

        // Fix retries re-invoke the agent inside the *same* environment so
        // mounts and prior file state persist. Each retry re-enters
        // RUNNING for the invocation and returns to VERIFYING for the
        // re-check.
        let registry = Arc::clone(&self.registry);
        let runtime = Arc::clone(&self.runtime);
        let agent_command = self.config.agent_command.clone();
        let raw_log = Arc::clone(&ctx.raw_log);
        let fix_handle = handle.clone();
        let reinvoke = move |prompt: String| {
            let registry = Arc::clone(&registry);
            let runtime = Arc::clone(&runtime);
            let agent_command = agent_command.clone();
            let raw_log = Arc::clone(&raw_log);
            let handle = fix_handle.clone();
            async move {
                registry.update(id, |r| r.transition(RunState::Running))??;
                registry.update(id, |r| r.fix_attempts += 1)?;

                let mut command = agent_command;
                command.push(prompt);
                let output = runtime.exec(&handle, &command).await?;

                if let Ok(mut log) = raw_log.lock() {
                    log.push_str(&output.stdout);
                }
                let events = EventParser::parse_all(output.stdout.as_bytes());
                registry.update(id, |r| r.events.extend(events))?;
                if output.exit_code != 0 {
                    tracing::warn!(
                        run_id = %id,
                        exit_code = output.exit_code,
                        "fix invocation exited nonzero"
                    );
                }
                registry.update(id, |r| r.transition(RunState::Verifying))??;
                Ok(())
            }
        };

        let check_dir = request.working_dir();
        let verify_fut = run_verification(&verify_config, &check_dir, reinvoke);
        tokio::pin!(verify_fut);
        let result = tokio::select! {
            result = &mut verify_fut => result,
            () = &mut timeout => {
                return Outcome {
                    state: RunState::TimedOut,
                    reason: format!("run exceeded its {}s timeout during verification", request.timeout_secs),
                };
            }
            _ = cancel_rx.changed() => {
                return Outcome {
                    state: RunState::Cancelled,
                    reason: "cancelled by caller during verification".into(),
                };
            }
        };

        match result {
            Ok(verify_result) => {
                let passed = verify_result.passed();
                let attempts = verify_result.fix_attempts_used;
                let failing: Vec<String> = verify_result
                    .failing()
                    .iter()
                    .map(|c| c.kind.to_string())
                    .collect();
                if let Err(e) = self.registry.update(id, |r| {
                    r.fix_attempts = attempts;
                    r.verify = Some(verify_result);
                }) {
                    tracing::error!(run_id = %id, error = %e, "failed to record verify result");
                }
                if passed {
                    Outcome {
                        state: RunState::Succeeded,
                        reason: "agent completed and all checks passed".into(),
                    }
                } else {
                    Outcome::failed(format!(
                        "{} check(s) still failing after {attempts} fix attempt(s)",
                        failing.join(", ")
                    ))
                }
            }
            Err(e) => Outcome::failed(format!("verification could not run: {e}")),
        }
    }

    /// Build the container spec from the resolved policy.
    ///
    /// No policy decisions happen here or below; mount modes and network
    /// access arrive pre-resolved.
    fn build_spec(
        &self,
        request: &RunRequest,
        policy: &ResolvedPolicy,
        ctx: &mut RunContext,
    ) -> Result<ContainerSpec, DrydockError> {
        let workdir = match &request.working_subdir {
            Some(subdir) => format!(
                "{}/{}",
                self.config.container_workdir.trim_end_matches('/'),
                subdir.display()
            ),
            None => self.config.container_workdir.clone(),
        };

        let mut mounts = vec![Mount {
            host: request.workspace.clone(),
            container: self.config.container_workdir.clone(),
            mode: policy.workspace_mount,
        }];

        let mut env: Vec<(String, String)> = request
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env.push((
            "DRYDOCK_EXECUTION_MODE".into(),
            request.execution_mode.to_string(),
        ));

        // Writable modes get a scratch session directory for credentials
        // and agent state. It is destroyed with the environment and never
        // persisted into artifacts.
        if policy.workspace_mount == MountMode::ReadWrite {
            let dir = tempfile::tempdir().map_err(|e| {
                DrydockError::EnvironmentError(format!("failed to create session dir: {e}"))
            })?;
            mounts.push(Mount {
                host: dir.path().to_path_buf(),
                container: SESSION_MOUNT.into(),
                mode: MountMode::ReadWrite,
            });
            env.push(("HOME".into(), SESSION_MOUNT.into()));
            ctx.session_dir = Some(dir);
        }

        let mut command = self.config.agent_command.clone();
        command.push(request.instruction.clone());

        Ok(ContainerSpec {
            image: self.config.image.clone(),
            command,
            mounts,
            env,
            user: self.config.user.clone(),
            network_allowed: policy.network_allowed,
            workdir,
        })
    }

    /// Record the terminal state, tear the environment down, and persist
    /// artifacts. Teardown failures are logged, never propagated.
    async fn finalize(&self, id: Uuid, request: &RunRequest, ctx: RunContext, outcome: Outcome) {
        match self.registry.update(id, |r| {
            let result = r.transition(outcome.state);
            if result.is_ok() {
                r.reason = Some(outcome.reason.clone());
            }
            result
        }) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(run_id = %id, error = %e, "terminal transition rejected"),
            Err(e) => tracing::error!(run_id = %id, error = %e, "run missing at finalization"),
        }

        if let Some(handle) = &ctx.handle {
            let grace = Duration::from_secs(self.config.stop_grace_secs);
            if let Err(e) = self.runtime.stop(handle, grace).await {
                tracing::warn!(run_id = %id, error = %e, "environment stop failed");
            }
            if let Err(e) = self.runtime.remove(handle).await {
                tracing::warn!(run_id = %id, error = %e, "environment remove failed");
            }
        }

        let policy = drydock_policy::resolve_for(request.security_mode, request.execution_mode);
        let Some(record) = self.registry.snapshot(id) else {
            tracing::error!(run_id = %id, "run missing, skipping artifact persistence");
            return;
        };
        let patch = self.collect_patch(request, &record.events, policy.write_workflow).await;

        let process_log = ctx
            .raw_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default();
        match self
            .store
            .persist(&record, request, &process_log, patch.as_deref())
        {
            Ok(paths) => {
                // Artifact path additions are the one permitted mutation
                // after a record turns terminal.
                if let Err(e) = self.registry.update(id, |r| r.artifacts = paths) {
                    tracing::error!(run_id = %id, error = %e, "failed to record artifact paths");
                }
            }
            Err(e) => tracing::error!(run_id = %id, error = %e, "artifact persistence failed"),
        }

        tracing::info!(
            run_id = %id,
            state = %outcome.state,
            reason = %outcome.reason,
            "run finalized"
        );
        // ctx drops here, deleting the scratch session directory.
    }

    /// Produce the run's patch artifact.
    ///
    /// Staged-patch runs concatenate the diffs the agent reported in its
    /// file-change events; direct-write runs take `git diff` of the
    /// workspace itself.
    async fn collect_patch(
        &self,
        request: &RunRequest,
        events: &[AgentEvent],
        workflow: WriteWorkflow,
    ) -> Option<String> {
        match workflow {
            WriteWorkflow::StagedPatch => {
                let mut patch = String::new();
                for event in events {
                    if let AgentEvent::FileChange {
                        diff: Some(diff), ..
                    } = event
                    {
                        patch.push_str(diff);
                        if !diff.ends_with('\n') {
                            patch.push('\n');
                        }
                    }
                }
                (!patch.is_empty()).then_some(patch)
            }
            WriteWorkflow::Direct => {
                let output = tokio::process::Command::new("git")
                    .arg("diff")
                    .current_dir(&request.workspace)
                    .output()
                    .await;
                match output {
                    Ok(output) if output.status.success() => {
                        let text = String::from_utf8_lossy(&output.stdout).into_owned();
                        (!text.trim().is_empty()).then_some(text)
                    }
                    Ok(output) => {
                        tracing::debug!(
                            code = output.status.code(),
                            "git diff unavailable for workspace"
                        );
                        None
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "git diff could not run");
                        None
                    }
                }
            }
        }
    }
}
