//! Node working directories and their cache artifacts.
//!
//! Layout of a node directory:
//!
//! ```text
//! <node_dir>/
//!   _0x<hash>.json     hashed inputs
//!   result.json        NodeResult
//!   command.txt        rendered command line(s)
//!   _report/report.md
//!   mapflow/_<node><i> map sub-runs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::hashing::HashDocument;
use crate::io::config::write_atomic;
use crate::io::outputs::missing_paths;
use crate::node::NodeResult;
use crate::spec::InterfaceSpec;

const HASH_PREFIX: &str = "_0x";

#[derive(Debug, Clone)]
pub struct NodeCache {
    dir: PathBuf,
}

impl NodeCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn hash_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{HASH_PREFIX}{hash}.json"))
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    pub fn command_path(&self) -> PathBuf {
        self.dir.join("command.txt")
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("_report").join("report.md")
    }

    pub fn mapflow_dir(&self, node: &str, index: usize) -> PathBuf {
        self.dir.join("mapflow").join(format!("_{node}{index}"))
    }

    /// Hash files currently present, sorted.
    pub fn hash_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))? {
            let path = entry?.path();
            let is_hash = path.file_name().and_then(|name| name.to_str()).is_some_and(|name| {
                name.starts_with(HASH_PREFIX) && name.ends_with(".json")
            });
            if is_hash {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// The previously stored hash document, if exactly one is readable.
    pub fn stored_document(&self) -> Option<HashDocument> {
        let files = self.hash_files().ok()?;
        let [only] = files.as_slice() else {
            return None;
        };
        let contents = fs::read_to_string(only).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn load_result(&self) -> Result<Option<NodeResult>> {
        let path = self.result_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let result = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(result))
    }

    /// The cached result when the directory holds exactly `hash`, a matching
    /// `result.json`, and every recorded output still exists.
    pub fn current_result(&self, spec: &InterfaceSpec, hash: &str) -> Option<NodeResult> {
        let files = self.hash_files().ok()?;
        if files != [self.hash_path(hash)] {
            return None;
        }
        let result = match self.load_result() {
            Ok(Some(result)) => result,
            Ok(None) => return None,
            Err(err) => {
                debug!(err = %err, "unreadable result.json");
                return None;
            }
        };
        if result.hash != hash {
            return None;
        }
        let missing = missing_paths(spec, &result.outputs);
        if !missing.is_empty() {
            debug!(missing = ?missing, "cached outputs vanished");
            return None;
        }
        Some(result)
    }

    /// Clear the directory for a fresh run. Map nodes keep `mapflow/` so
    /// unchanged elements stay cached.
    pub fn reset(&self, keep_mapflow: bool) -> Result<()> {
        if !self.dir.exists() {
            return fs::create_dir_all(&self.dir)
                .with_context(|| format!("create {}", self.dir.display()));
        }
        if !keep_mapflow {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("remove {}", self.dir.display()))?;
            return fs::create_dir_all(&self.dir)
                .with_context(|| format!("create {}", self.dir.display()));
        }
        for entry in fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))? {
            let path = entry?.path();
            if path.file_name().is_some_and(|name| name == "mapflow") {
                continue;
            }
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Remove `mapflow/` entries other than `_<node>0 .. _<node><width-1>`,
    /// left behind when a map input shrinks. Returns how many were removed.
    pub fn prune_mapflow(&self, node: &str, width: usize) -> Result<usize> {
        let mapflow = self.dir.join("mapflow");
        if !mapflow.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&mapflow).with_context(|| format!("read {}", mapflow.display()))? {
            let path = entry?.path();
            let keep = (0..width).any(|index| path == self.mapflow_dir(node, index));
            if keep {
                continue;
            }
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.with_context(|| format!("remove {}", path.display()))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(dir = %mapflow.display(), removed, "pruned stale map sub-runs");
        }
        Ok(removed)
    }

    pub fn write_hash(&self, hash: &str, doc: &HashDocument) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(doc).context("serialize hash document")?;
        buf.push('\n');
        write_atomic(&self.hash_path(hash), buf.as_bytes())
    }

    pub fn write_result(&self, result: &NodeResult) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(result).context("serialize node result")?;
        buf.push('\n');
        write_atomic(&self.result_path(), buf.as_bytes())
    }

    pub fn write_command(&self, cmdlines: &[String]) -> Result<()> {
        let mut buf = cmdlines.join("\n");
        buf.push('\n');
        write_atomic(&self.command_path(), buf.as_bytes())
    }

    pub fn write_report(&self, report: &str) -> Result<()> {
        write_atomic(&self.report_path(), report.as_bytes())
    }
}
