//! Human-readable node reports and the per-run outcome summary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};

use crate::core::types::NodeStatus;
use crate::io::config::write_atomic;
use crate::node::NodeResult;

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");

/// Render `_report/report.md` for a node result.
pub fn render_report(result: &NodeResult, status: NodeStatus, node_dir: &Path) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("report.md", REPORT_TEMPLATE)
        .context("load report template")?;
    let template = env.get_template("report.md")?;
    let rendered = template
        .render(context! {
            node => &result.node,
            hash => &result.hash,
            status => status.as_str(),
            node_dir => node_dir.display().to_string(),
            runs => &result.runs,
        })
        .context("render report")?;
    Ok(rendered)
}

/// Summary written to `<workflow dir>/_run/outcome.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow: String,
    pub started_at: String,
    pub finished_at: String,
    pub statuses: BTreeMap<String, NodeStatus>,
    pub crash_files: Vec<PathBuf>,
}

pub fn outcome_path(workflow_dir: &Path) -> PathBuf {
    workflow_dir.join("_run").join("outcome.json")
}

pub fn write_summary(workflow_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let path = outcome_path(workflow_dir);
    let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    buf.push('\n');
    write_atomic(&path, buf.as_bytes())?;
    Ok(path)
}
