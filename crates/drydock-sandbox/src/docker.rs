//! Docker container runtime backend.
//!
//! Drives the `docker` CLI with security-hardened defaults:
//! - All capabilities dropped (`--cap-drop=ALL`)
//! - No new privileges (`--security-opt=no-new-privileges`)
//! - Read-only root filesystem with a size-limited tmpfs `/tmp`
//! - `--network=none` unless the resolved policy permits network access
//! - PID limit to prevent fork bombs
//!
//! Workspace and session mounts are passed in pre-resolved; the only logic
//! here is argument construction and input validation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use drydock_types::DrydockError;

use crate::backend::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ExecOutput, OutputStream,
};

/// PID ceiling inside the environment.
const PIDS_LIMIT: u32 = 512;

/// Size cap for the writable tmpfs at `/tmp`.
const TMPFS_SIZE: &str = "256m";

/// Docker CLI runtime.
#[derive(Debug, Clone, Default)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        Self
    }

    async fn run_docker(args: &[String]) -> Result<std::process::Output, DrydockError> {
        tracing::trace!(?args, "docker invocation");
        Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DrydockError::EnvironmentError(format!(
                    "failed to invoke docker (is Docker installed?): {e}"
                ))
            })
    }
}

/// Build the `docker create` argument vector for a spec.
///
/// Exposed so tests can inspect the constructed command without a Docker
/// daemon.
pub fn build_create_args(spec: &ContainerSpec) -> Result<Vec<String>, DrydockError> {
    validate_image_name(&spec.image)?;

    let mut args: Vec<String> = vec![
        "create".into(),
        "--cap-drop=ALL".into(),
        "--security-opt=no-new-privileges".into(),
        "--read-only".into(),
        format!("--pids-limit={PIDS_LIMIT}"),
        "--tmpfs".into(),
        format!("/tmp:size={TMPFS_SIZE}"),
        format!(
            "--network={}",
            if spec.network_allowed { "bridge" } else { "none" }
        ),
        "-w".into(),
        spec.workdir.clone(),
    ];

    if let Some(user) = &spec.user {
        validate_user(user)?;
        args.push("--user".into());
        args.push(user.clone());
    }

    for mount in &spec.mounts {
        let host = mount.host.to_string_lossy();
        validate_host_path(&host)?;
        validate_container_path(&mount.container)?;
        args.push("-v".into());
        args.push(format!("{host}:{}:{}", mount.container, mount.mode));
    }

    for (key, value) in &spec.env {
        validate_env_key(key)?;
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());

    Ok(args)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, DrydockError> {
        let args = build_create_args(spec)?;
        let output = Self::run_docker(&args).await?;
        if !output.status.success() {
            return Err(DrydockError::EnvironmentError(format!(
                "docker create failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(DrydockError::EnvironmentError(
                "docker create returned no container id".into(),
            ));
        }
        tracing::info!(container_id = %id, image = %spec.image, "container created");
        Ok(ContainerHandle { id })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), DrydockError> {
        let output = Self::run_docker(&["start".into(), handle.id.clone()]).await?;
        if !output.status.success() {
            return Err(DrydockError::EnvironmentError(format!(
                "docker start failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn stream_output(&self, handle: &ContainerHandle) -> Result<OutputStream, DrydockError> {
        let mut child = Command::new("docker")
            .args(["logs", "--follow", &handle.id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            // The agent protocol flows on the container's stdout; its
            // stderr surfaces via `wait`/`exec` diagnostics instead.
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DrydockError::EnvironmentError(format!("docker logs spawn: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            DrydockError::EnvironmentError("docker logs stdout not captured".into())
        })?;

        // The detached child EOFs and exits when the container's main
        // process does; tokio reaps it in the background.
        drop(child);
        Ok(Box::new(stdout))
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i32, DrydockError> {
        let output = Self::run_docker(&["wait".into(), handle.id.clone()]).await?;
        if !output.status.success() {
            return Err(DrydockError::EnvironmentError(format!(
                "docker wait failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<i32>().map_err(|e| {
            DrydockError::EnvironmentError(format!(
                "docker wait returned non-numeric exit code {:?}: {e}",
                text.trim()
            ))
        })
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
    ) -> Result<ExecOutput, DrydockError> {
        let mut args: Vec<String> = vec!["exec".into(), handle.id.clone()];
        args.extend(command.iter().cloned());

        let output = Self::run_docker(&args).await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), DrydockError> {
        let output = Self::run_docker(&[
            "stop".into(),
            "-t".into(),
            grace.as_secs().to_string(),
            handle.id.clone(),
        ])
        .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(());
            }
            return Err(DrydockError::EnvironmentError(format!(
                "docker stop failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), DrydockError> {
        let output =
            Self::run_docker(&["rm".into(), "-f".into(), handle.id.clone()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Idempotent: the engine may already have removed the resource.
            if is_not_found(&stderr) {
                tracing::debug!(container_id = %handle.id, "container already removed");
                return Ok(());
            }
            return Err(DrydockError::EnvironmentError(format!(
                "docker rm failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn copy_out(
        &self,
        handle: &ContainerHandle,
        path: &Path,
    ) -> Result<Vec<u8>, DrydockError> {
        let dir = tempfile::tempdir()
            .map_err(|e| DrydockError::EnvironmentError(format!("copy_out tempdir: {e}")))?;
        let dest = dir.path().join("out");

        let output = Self::run_docker(&[
            "cp".into(),
            format!("{}:{}", handle.id, path.display()),
            dest.to_string_lossy().into_owned(),
        ])
        .await?;
        if !output.status.success() {
            return Err(DrydockError::EnvironmentError(format!(
                "docker cp failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        std::fs::read(&dest)
            .map_err(|e| DrydockError::EnvironmentError(format!("copy_out read: {e}")))
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("is not running")
}

/// Validate a Docker image name to prevent argument injection.
///
/// Allowed characters cover standard references like `ubuntu:22.04` and
/// `registry.example.com/team/image:tag`.
pub fn validate_image_name(image: &str) -> Result<(), DrydockError> {
    if image.is_empty() {
        return Err(DrydockError::ConfigError(
            "container image name cannot be empty".into(),
        ));
    }
    if image.len() > 256 {
        return Err(DrydockError::ConfigError(
            "container image name exceeds 256 characters".into(),
        ));
    }
    for ch in image.chars() {
        if !ch.is_alphanumeric()
            && ch != '-'
            && ch != '.'
            && ch != ':'
            && ch != '/'
            && ch != '_'
            && ch != '@'
        {
            return Err(DrydockError::ConfigError(format!(
                "container image name contains invalid character {ch:?}"
            )));
        }
    }
    if image.starts_with('-') || image.starts_with('.') || image.starts_with(':') {
        return Err(DrydockError::ConfigError(format!(
            "container image name cannot start with {:?}",
            &image[..1]
        )));
    }
    Ok(())
}

/// Reject host paths with traversal or injection characters.
fn validate_host_path(path: &str) -> Result<(), DrydockError> {
    if path.is_empty() {
        return Err(DrydockError::ConfigError("mount host path cannot be empty".into()));
    }
    if path.contains('\0') || path.contains('\n') || path.contains('\r') {
        return Err(DrydockError::ConfigError(format!(
            "mount host path contains an injection character: {path:?}"
        )));
    }
    for component in Path::new(path).components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(DrydockError::ConfigError(format!(
                "mount host path {path:?} contains a '..' traversal component"
            )));
        }
    }
    Ok(())
}

fn validate_container_path(path: &str) -> Result<(), DrydockError> {
    if !path.starts_with('/') {
        return Err(DrydockError::ConfigError(format!(
            "container mount point must be absolute, got {path:?}"
        )));
    }
    if path.contains(':') || path.contains('\0') || path.contains('\n') {
        return Err(DrydockError::ConfigError(format!(
            "container mount point contains an invalid character: {path:?}"
        )));
    }
    Ok(())
}

fn validate_user(user: &str) -> Result<(), DrydockError> {
    if user.is_empty()
        || !user
            .chars()
            .all(|c| c.is_alphanumeric() || c == ':' || c == '_' || c == '-')
    {
        return Err(DrydockError::ConfigError(format!(
            "invalid container user {user:?}"
        )));
    }
    Ok(())
}

fn validate_env_key(key: &str) -> Result<(), DrydockError> {
    if key.is_empty()
        || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(DrydockError::ConfigError(format!(
            "invalid environment variable name {key:?}"
        )));
    }
    Ok(())
}
