//! Container runtime client for Drydock.
//!
//! Abstraction over the isolation backend plus the Docker CLI
//! implementation with hardened defaults.

pub mod backend;
pub mod docker;

pub use backend::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ExecOutput, Mount, OutputStream,
};
pub use docker::{build_create_args, validate_image_name, DockerRuntime};
