//! Agent event-stream decoding for Drydock.
//!
//! Incremental NDJSON parsing into typed events, completion-summary
//! extraction, and output-contract validation.

pub mod contract;
pub mod parser;
pub mod summary;

pub use contract::{ContractValidator, DEFAULT_CONTRACT_NAME};
pub use parser::EventParser;
pub use summary::extract_summary;
