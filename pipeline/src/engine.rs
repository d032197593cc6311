//! Workflow execution: expand, schedule, run, record.
//!
//! Both plugins share one scheduler. `Linear` runs ready instances one at a
//! time in topological order; `MultiProc` keeps up to `n_procs` instances in
//! flight on scoped threads and feeds completions back over a channel.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::expand::Expansion;
use crate::core::graph::descendants;
use crate::core::types::NodeStatus;
use crate::interface::RunOptions;
use crate::io::config::{PipelineConfig, PluginConfig, PluginName};
use crate::io::crash::write_crash_file;
use crate::io::executor::CommandRunner;
use crate::io::report::{RunSummary, write_summary};
use crate::node::{Node, NodeOptions, NodeOutcome, NodeResult, run_node};
use crate::value::Value;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plugin {
    Linear,
    MultiProc { n_procs: usize },
}

impl Plugin {
    pub fn from_config(config: &PluginConfig) -> Self {
        match config.name {
            PluginName::Linear => Plugin::Linear,
            PluginName::Multiproc => Plugin::MultiProc {
                n_procs: config.n_procs.max(1),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    /// Status per instance id.
    pub statuses: BTreeMap<String, NodeStatus>,
    /// Results of succeeded and cached instances.
    pub results: BTreeMap<String, NodeResult>,
    pub crash_files: Vec<PathBuf>,
    pub summary_path: PathBuf,
}

impl WorkflowOutcome {
    pub fn failed(&self) -> Vec<&str> {
        self.with_status(NodeStatus::Failed)
    }

    pub fn with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, current)| **current == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn ensure_success(&self) -> Result<()> {
        let failed = self.failed();
        if failed.is_empty() {
            return Ok(());
        }
        let mut message = format!("{} node(s) failed: {}", failed.len(), failed.join(", "));
        if !self.crash_files.is_empty() {
            let files: Vec<String> = self
                .crash_files
                .iter()
                .map(|path| path.display().to_string())
                .collect();
            message.push_str(&format!(" (crash files: {})", files.join(", ")));
        }
        Err(anyhow!(message))
    }
}

/// Validate, expand and run `workflow`, then write `_run/outcome.json`.
///
/// Node failures do not make this return `Err`; they show up in the outcome.
#[instrument(skip_all, fields(workflow = %workflow.name))]
pub fn run_workflow(
    workflow: &Workflow,
    runner: &dyn CommandRunner,
    config: &PipelineConfig,
    plugin: Plugin,
) -> Result<WorkflowOutcome> {
    config.validate()?;
    workflow.validate()?;
    let expansion = workflow.expand(config.execution.parameterize_dirs)?;
    let started_at = Utc::now().to_rfc3339();
    info!(instances = expansion.instances.len(), ?plugin, "starting workflow");

    let options = NodeOptions {
        hash_method: config.execution.hash_method,
        run: RunOptions {
            timeout: config.execution.command_timeout(),
            output_limit_bytes: config.execution.output_limit_bytes,
        },
    };
    let crash_dir = config
        .execution
        .crashdump_dir
        .clone()
        .unwrap_or_else(|| workflow.workflow_dir().join("crash"));
    let mut scheduler = Scheduler::new(
        workflow,
        expansion,
        crash_dir,
        config.execution.stop_on_first_crash,
    );

    match plugin {
        Plugin::Linear => run_linear(&mut scheduler, runner, &options),
        Plugin::MultiProc { n_procs } => {
            run_parallel(&mut scheduler, runner, &options, n_procs.max(1))?;
        }
    }
    scheduler.skip_remaining();

    let Scheduler {
        statuses,
        results,
        crash_files,
        ..
    } = scheduler;
    let summary = RunSummary {
        workflow: workflow.name.clone(),
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        statuses: statuses.clone(),
        crash_files: crash_files.clone(),
    };
    let summary_path = write_summary(&workflow.workflow_dir(), &summary)?;
    info!(
        failed = summary.statuses.values().filter(|s| **s == NodeStatus::Failed).count(),
        summary = %summary_path.display(),
        "workflow finished"
    );
    Ok(WorkflowOutcome {
        statuses,
        results,
        crash_files,
        summary_path,
    })
}

/// Remove the workflow directory. Returns whether anything was removed.
pub fn clean_workflow(workflow: &Workflow) -> Result<bool> {
    let dir = workflow.workflow_dir();
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
    info!(dir = %dir.display(), "removed workflow directory");
    Ok(true)
}

struct Job<'a> {
    id: String,
    node: &'a Node,
    inputs: BTreeMap<String, Value>,
    dir: PathBuf,
}

struct Finished {
    id: String,
    inputs: BTreeMap<String, Value>,
    dir: PathBuf,
    outcome: Result<NodeOutcome>,
}

fn execute(job: Job<'_>, runner: &dyn CommandRunner, options: &NodeOptions) -> Finished {
    let Job {
        id,
        node,
        inputs,
        dir,
    } = job;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_node(node, &inputs, &dir, runner, options)
    }))
    .unwrap_or_else(|_| Err(anyhow!("node '{id}' panicked")))
    .with_context(|| format!("run node '{id}'"));
    Finished {
        id,
        inputs,
        dir,
        outcome,
    }
}

fn run_linear(scheduler: &mut Scheduler<'_>, runner: &dyn CommandRunner, options: &NodeOptions) {
    while let Some(id) = scheduler.next_ready() {
        match scheduler.prepare(&id) {
            Ok(job) => {
                let finished = execute(job, runner, options);
                scheduler.finish(finished);
            }
            Err(finished) => scheduler.finish(finished),
        }
    }
}

fn run_parallel(
    scheduler: &mut Scheduler<'_>,
    runner: &dyn CommandRunner,
    options: &NodeOptions,
    n_procs: usize,
) -> Result<()> {
    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<Finished>();
        let mut in_flight = 0usize;
        loop {
            while in_flight < n_procs {
                let Some(id) = scheduler.next_ready() else {
                    break;
                };
                match scheduler.prepare(&id) {
                    Ok(job) => {
                        let tx = tx.clone();
                        in_flight += 1;
                        scope.spawn(move || {
                            let _ = tx.send(execute(job, runner, options));
                        });
                    }
                    Err(finished) => scheduler.finish(finished),
                }
            }
            if in_flight == 0 {
                return Ok(());
            }
            let finished = rx
                .recv()
                .map_err(|_| anyhow!("worker channel closed with {in_flight} node(s) in flight"))?;
            in_flight -= 1;
            scheduler.finish(finished);
        }
    })
}

struct Scheduler<'a> {
    workflow: &'a Workflow,
    expansion: Expansion,
    edges: Vec<(String, String)>,
    crash_dir: PathBuf,
    stop_on_first_crash: bool,
    started: BTreeSet<String>,
    statuses: BTreeMap<String, NodeStatus>,
    results: BTreeMap<String, NodeResult>,
    crash_files: Vec<PathBuf>,
    stopped: bool,
}

impl<'a> Scheduler<'a> {
    fn new(
        workflow: &'a Workflow,
        expansion: Expansion,
        crash_dir: PathBuf,
        stop_on_first_crash: bool,
    ) -> Self {
        let edges = expansion.edges();
        Self {
            workflow,
            expansion,
            edges,
            crash_dir,
            stop_on_first_crash,
            started: BTreeSet::new(),
            statuses: BTreeMap::new(),
            results: BTreeMap::new(),
            crash_files: Vec::new(),
            stopped: false,
        }
    }

    fn is_ready(&self, id: &str) -> bool {
        if self.started.contains(id) || self.statuses.contains_key(id) {
            return false;
        }
        self.expansion.get(id).is_some_and(|instance| {
            instance
                .upstream
                .values()
                .all(|upstream| self.results.contains_key(upstream))
        })
    }

    /// First ready instance in topological order, marked as started.
    fn next_ready(&mut self) -> Option<String> {
        if self.stopped {
            return None;
        }
        let id = self
            .expansion
            .instances
            .iter()
            .map(|instance| instance.id.clone())
            .find(|id| self.is_ready(id))?;
        self.started.insert(id.clone());
        Some(id)
    }

    /// Resolve an instance's inputs: static, then iterable overrides, then
    /// connected upstream outputs.
    fn prepare(&self, id: &str) -> std::result::Result<Job<'a>, Finished> {
        let workflow = self.workflow;
        let fail = |inputs: BTreeMap<String, Value>, dir: PathBuf, err: anyhow::Error| Finished {
            id: id.to_string(),
            inputs,
            dir,
            outcome: Err(err),
        };
        let Some(instance) = self.expansion.get(id) else {
            return Err(fail(
                BTreeMap::new(),
                workflow.workflow_dir(),
                anyhow!("unknown instance '{id}'"),
            ));
        };
        let dir = workflow.instance_dir(instance);
        let Some(node) = workflow.node(&instance.node) else {
            return Err(fail(
                BTreeMap::new(),
                dir,
                anyhow!("unknown node '{}'", instance.node),
            ));
        };

        let mut inputs = node.inputs.clone();
        inputs.extend(instance.overrides.clone());
        for connection in workflow.incoming(&node.name) {
            let value = instance
                .upstream
                .get(&connection.source)
                .and_then(|upstream| self.results.get(upstream))
                .and_then(|result| result.outputs.get(&connection.output));
            match value {
                Some(value) => {
                    inputs.insert(connection.input.clone(), value.clone());
                }
                None => {
                    let err = anyhow!(
                        "upstream output '{}.{}' for input '{}' is missing",
                        connection.source,
                        connection.output,
                        connection.input
                    );
                    return Err(fail(inputs, dir, err));
                }
            }
        }
        Ok(Job {
            id: id.to_string(),
            node,
            inputs,
            dir,
        })
    }

    fn finish(&mut self, finished: Finished) {
        let Finished {
            id,
            inputs,
            dir,
            outcome,
        } = finished;
        match outcome {
            Ok(outcome) => {
                let status = if outcome.cached {
                    NodeStatus::Cached
                } else {
                    NodeStatus::Succeeded
                };
                info!(node = %id, %status, "node finished");
                self.statuses.insert(id.clone(), status);
                self.results.insert(id, outcome.result);
            }
            Err(err) => {
                warn!(node = %id, err = %format!("{err:#}"), "node failed");
                self.statuses.insert(id.clone(), NodeStatus::Failed);
                self.record_crash(&id, &dir, &err, &inputs);
                for downstream in descendants(&id, &self.edges) {
                    self.statuses.entry(downstream).or_insert(NodeStatus::Skipped);
                }
                if self.stop_on_first_crash {
                    self.stopped = true;
                }
            }
        }
    }

    fn record_crash(
        &mut self,
        id: &str,
        dir: &Path,
        err: &anyhow::Error,
        inputs: &BTreeMap<String, Value>,
    ) {
        match write_crash_file(&self.crash_dir, id, dir, err, inputs) {
            Ok(path) => self.crash_files.push(path),
            Err(write_err) => warn!(node = %id, err = %write_err, "could not write crash file"),
        }
    }

    fn skip_remaining(&mut self) {
        for instance in &self.expansion.instances {
            self.statuses
                .entry(instance.id.clone())
                .or_insert(NodeStatus::Skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedRunner, TestWorkspace, bet_like_spec};
    use std::sync::Arc;

    fn chain(workspace: &TestWorkspace) -> Workflow {
        let input = workspace.file("t1.nii.gz", "img").expect("input");
        let spec = Arc::new(bet_like_spec());
        let mut wf = Workflow::new("wf", workspace.path().join("work"));
        wf.add_node(Node::new("first", Arc::clone(&spec)).with_input("in_file", &input))
            .expect("first");
        wf.add_node(Node::new("second", Arc::clone(&spec))).expect("second");
        wf.add_node(Node::new("third", spec)).expect("third");
        wf.connect("first", "out_file", "second", "in_file").expect("c1");
        wf.connect("second", "out_file", "third", "in_file").expect("c2");
        wf
    }

    #[test]
    fn linear_run_threads_outputs_downstream() {
        let workspace = TestWorkspace::new().expect("workspace");
        let wf = chain(&workspace);
        let runner = ScriptedRunner::new();
        let outcome =
            run_workflow(&wf, &runner, &PipelineConfig::default(), Plugin::Linear).expect("run");

        assert!(outcome.ensure_success().is_ok());
        assert_eq!(outcome.with_status(NodeStatus::Succeeded).len(), 3);
        let third = &outcome.results["third"];
        assert_eq!(
            third.outputs["out_file"],
            Value::from(wf.workflow_dir().join("third/t1_brain_brain_brain.nii.gz"))
        );
        assert!(outcome.summary_path.is_file());
    }

    #[test]
    fn failure_skips_descendants_and_writes_crash_file() {
        let workspace = TestWorkspace::new().expect("workspace");
        let wf = chain(&workspace);
        let runner = ScriptedRunner::new().fail("bet", 1, "boom");
        let outcome =
            run_workflow(&wf, &runner, &PipelineConfig::default(), Plugin::Linear).expect("run");

        assert_eq!(outcome.statuses["first"], NodeStatus::Failed);
        assert_eq!(outcome.statuses["second"], NodeStatus::Skipped);
        assert_eq!(outcome.statuses["third"], NodeStatus::Skipped);
        assert_eq!(outcome.crash_files.len(), 1);
        assert!(outcome.crash_files[0].starts_with(wf.workflow_dir().join("crash")));
        let err = outcome.ensure_success().unwrap_err().to_string();
        assert!(err.contains("1 node(s) failed: first"));
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn plugin_follows_config() {
        let mut config = PluginConfig::default();
        assert_eq!(Plugin::from_config(&config), Plugin::Linear);
        config.name = PluginName::Multiproc;
        config.n_procs = 3;
        assert_eq!(Plugin::from_config(&config), Plugin::MultiProc { n_procs: 3 });
    }

    #[test]
    fn clean_removes_workflow_dir() {
        let workspace = TestWorkspace::new().expect("workspace");
        let wf = chain(&workspace);
        run_workflow(&wf, &ScriptedRunner::new(), &PipelineConfig::default(), Plugin::Linear)
            .expect("run");
        assert!(clean_workflow(&wf).expect("clean"));
        assert!(!wf.workflow_dir().exists());
        assert!(!clean_workflow(&wf).expect("clean again"));
    }
}
