//! Stable exit codes for `pipeline` CLI commands.

/// Command succeeded; every workflow node succeeded or was cached.
pub const OK: i32 = 0;
/// Invalid definition, config or graph, or any other error.
pub const INVALID: i32 = 1;
/// `pipeline run` finished but at least one node failed.
pub const FAILED: i32 = 2;
