//! Container runtime abstraction.
//!
//! The run lifecycle manager talks to the isolation backend only through
//! [`ContainerRuntime`]. Mount permissions arrive pre-resolved from the
//! policy engine; this layer has no policy logic of its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use drydock_policy::MountMode;
use drydock_types::DrydockError;

/// One bind mount into the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Host path.
    pub host: PathBuf,
    /// Mount point inside the container.
    pub container: String,
    /// Permission, resolved by the policy engine.
    pub mode: MountMode,
}

/// Everything needed to materialize one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// Process to run, argv form. The environment lives exactly as long as
    /// this process.
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    /// Container user, e.g. `1000:1000`. `None` uses the image default.
    pub user: Option<String>,
    /// Whether outbound network access is permitted.
    pub network_allowed: bool,
    /// Working directory inside the container.
    pub workdir: String,
}

/// Opaque handle to a created environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
}

/// Captured output of an exec inside a running environment.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The environment's combined output as an async byte stream.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Abstraction over the isolation backend.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Materialize an environment without starting it.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, DrydockError>;

    /// Start a created environment.
    async fn start(&self, handle: &ContainerHandle) -> Result<(), DrydockError>;

    /// Stream the environment's combined stdout/stderr. The stream ends
    /// when the main process exits.
    async fn stream_output(&self, handle: &ContainerHandle) -> Result<OutputStream, DrydockError>;

    /// Block until the main process exits; returns its exit code.
    async fn wait(&self, handle: &ContainerHandle) -> Result<i32, DrydockError>;

    /// Run an additional command inside the running environment (fix
    /// re-invocations share the environment and its file state).
    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &[String],
    ) -> Result<ExecOutput, DrydockError>;

    /// Stop the environment, allowing `grace` before a hard kill.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), DrydockError>;

    /// Remove the environment. Idempotent: an already-removed environment
    /// is not an error.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), DrydockError>;

    /// Copy a file out of the environment.
    async fn copy_out(&self, handle: &ContainerHandle, path: &Path)
        -> Result<Vec<u8>, DrydockError>;
}
