//! Crash files for failed node instances.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

use crate::io::config::write_atomic;
use crate::value::Value;

/// Write `crash-<YYYYmmdd-HHMMSS>-<node>.txt` into `dir` and return its path.
pub fn write_crash_file(
    dir: &Path,
    node: &str,
    node_dir: &Path,
    error: &anyhow::Error,
    inputs: &BTreeMap<String, Value>,
) -> Result<PathBuf> {
    let now = Utc::now();
    let path = dir.join(format!("crash-{}-{}.txt", now.format("%Y%m%d-%H%M%S"), node));

    let mut body = String::new();
    let _ = writeln!(body, "node: {node}");
    let _ = writeln!(body, "time: {}", now.to_rfc3339());
    let _ = writeln!(body, "working directory: {}", node_dir.display());
    let _ = writeln!(body, "\nerror:");
    for (depth, cause) in error.chain().enumerate() {
        let _ = writeln!(body, "  {depth}: {cause}");
    }
    let _ = writeln!(body, "\ninputs:");
    let rendered = serde_json::to_string_pretty(inputs).context("serialize crash inputs")?;
    body.push_str(&rendered);
    body.push('\n');

    write_atomic(&path, body.as_bytes())?;
    warn!(node, path = %path.display(), "node failed, wrote crash file");
    Ok(path)
}
