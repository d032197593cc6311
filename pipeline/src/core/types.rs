//! Shared deterministic types for the workflow engine.
//!
//! These types define stable contracts between core components and the
//! serialized run artifacts (`result.json`, `_run/outcome.json`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// How must-exist file inputs contribute to a node hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMethod {
    /// File size and modification time.
    #[default]
    Timestamp,
    /// SHA-256 of the file bytes.
    Content,
}

/// Final state of one node instance after a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// The interface ran and its outputs were verified.
    Succeeded,
    /// A current cache entry was reused; nothing ran.
    Cached,
    Failed,
    /// Not run because an upstream instance failed or the run stopped early.
    Skipped,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Cached => "cached",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }

    /// Succeeded or cached.
    pub fn is_ok(self) -> bool {
        matches!(self, NodeStatus::Succeeded | NodeStatus::Cached)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
