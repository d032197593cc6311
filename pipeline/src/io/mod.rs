//! Side-effecting operations: processes, the filesystem, definition files.

pub mod cache;
pub mod config;
pub mod crash;
pub mod executor;
pub mod fingerprint;
pub mod inputs;
pub mod interface_store;
pub mod outputs;
pub mod process;
pub mod report;
pub mod workflow_file;
