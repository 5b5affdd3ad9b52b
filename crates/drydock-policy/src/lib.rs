//! Security policy engine for Drydock.
//!
//! Pure mapping from declared security modes to environment permissions.

pub mod engine;

pub use engine::{
    enforce_confirmation, resolve, resolve_for, MountMode, ResolvedPolicy, WriteWorkflow,
};
