//! Workflow nodes: cached interface runs, optionally mapped over list inputs.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::expand::Iterable;
use crate::core::hashing::{diff_entries, fingerprinted_paths, hash_document, node_hash};
use crate::core::types::{HashMethod, NodeStatus};
use crate::core::validate::check_value;
use crate::interface::{Interface, InterfaceResult, RunOptions};
use crate::io::cache::NodeCache;
use crate::io::executor::CommandRunner;
use crate::io::fingerprint::fingerprint_all;
use crate::io::inputs::{absolutize_inputs, check_existing};
use crate::io::report::render_report;
use crate::spec::InterfaceSpec;
use crate::value::Value;

/// A graph vertex wrapping one interface.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub spec: Arc<InterfaceSpec>,
    /// Static inputs; connections and iterables add to these per instance.
    pub inputs: BTreeMap<String, Value>,
    pub iterables: Vec<Iterable>,
    /// Non-empty makes this a MapNode over these list inputs.
    pub map_fields: Vec<String>,
    /// Rerun even when the cache is current.
    pub overwrite: bool,
}

impl Node {
    pub fn new(name: impl Into<String>, spec: Arc<InterfaceSpec>) -> Self {
        Self {
            name: name.into(),
            spec,
            inputs: BTreeMap::new(),
            iterables: Vec::new(),
            map_fields: Vec::new(),
            overwrite: false,
        }
    }

    pub fn with_input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.to_string(), value.into());
        self
    }

    /// Set a static input after checking the field and the value's kind.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if let Some(err) = self.check_input(name, &value) {
            return Err(anyhow!("node '{}': {}", self.name, err));
        }
        self.inputs.insert(name.to_string(), value);
        Ok(())
    }

    pub fn iterable(mut self, field: &str, values: Vec<Value>) -> Self {
        self.iterables.push(Iterable {
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn map_over(mut self, fields: &[&str]) -> Self {
        self.map_fields = fields.iter().map(|field| field.to_string()).collect();
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn is_map_node(&self) -> bool {
        !self.map_fields.is_empty()
    }

    /// Type check of one value for `name`; map fields take lists of the field kind.
    pub fn check_input(&self, name: &str, value: &Value) -> Option<String> {
        let Some(field) = self.spec.input(name) else {
            return Some(format!("unknown input '{name}' for {}", self.spec.name));
        };
        let result = if self.map_fields.iter().any(|mapped| mapped == name) {
            match value {
                Value::List(items) => items
                    .iter()
                    .enumerate()
                    .try_for_each(|(index, item)| {
                        check_value(&field.kind, item).map_err(|err| format!("item {index}: {err}"))
                    }),
                other => Err(format!("map input needs a list, got {}", other.type_name())),
            }
        } else {
            check_value(&field.kind, value)
        };
        result.err().map(|err| format!("input '{name}': {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: String,
    pub hash: String,
    pub outputs: BTreeMap<String, Value>,
    pub runs: Vec<InterfaceResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub result: NodeResult,
    /// True when nothing ran because the cache was current.
    pub cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOptions {
    pub hash_method: HashMethod,
    pub run: RunOptions,
}

/// Run `node` with fully resolved `inputs` in `node_dir`, reusing a current cache.
#[instrument(skip_all, fields(node = %node.name, dir = %node_dir.display()))]
pub fn run_node(
    node: &Node,
    inputs: &BTreeMap<String, Value>,
    node_dir: &Path,
    runner: &dyn CommandRunner,
    options: &NodeOptions,
) -> Result<NodeOutcome> {
    let launch_dir = env::current_dir().context("resolve launch directory")?;
    let inputs = absolutize_inputs(&node.spec, inputs, &launch_dir);
    let cache = NodeCache::new(node_dir);

    if !node.is_map_node() {
        return run_cached(node, &node.name, &inputs, &[], &cache, options, |cache| {
            let result = Interface::with_inputs(Arc::clone(&node.spec), inputs.clone())
                .run(runner, cache.dir(), &options.run)?;
            Ok((result.outputs.clone(), vec![result]))
        });
    }

    let width = map_width(node, &inputs)?;
    run_cached(
        node,
        &node.name,
        &inputs,
        &node.map_fields,
        &cache,
        options,
        |cache| {
            cache.prune_mapflow(&node.name, width)?;
            let mut subresults = Vec::with_capacity(width);
            for index in 0..width {
                let mut sub_inputs = inputs.clone();
                for field in &node.map_fields {
                    if let Some(Value::List(items)) = inputs.get(field) {
                        sub_inputs.insert(field.clone(), items[index].clone());
                    }
                }
                let sub_cache = NodeCache::new(cache.mapflow_dir(&node.name, index));
                let sub_name = format!("_{}{}", node.name, index);
                let outcome = run_cached(node, &sub_name, &sub_inputs, &[], &sub_cache, options, |sub| {
                    let result = Interface::with_inputs(Arc::clone(&node.spec), sub_inputs.clone())
                        .run(runner, sub.dir(), &options.run)?;
                    Ok((result.outputs.clone(), vec![result]))
                })
                .with_context(|| format!("map element {index} of node '{}'", node.name))?;
                subresults.push(outcome.result);
            }
            Ok(gather_outputs(node, subresults))
        },
    )
}

/// Length shared by every map field.
fn map_width(node: &Node, inputs: &BTreeMap<String, Value>) -> Result<usize> {
    let mut width = None;
    for field in &node.map_fields {
        let items = inputs
            .get(field)
            .and_then(Value::as_list)
            .ok_or_else(|| anyhow!("node '{}': map input '{}' must be a list", node.name, field))?;
        match width {
            None => width = Some(items.len()),
            Some(expected) if expected != items.len() => {
                return Err(anyhow!(
                    "node '{}': map inputs must have equal lengths ({} has {}, expected {})",
                    node.name,
                    field,
                    items.len(),
                    expected
                ));
            }
            Some(_) => {}
        }
    }
    Ok(width.unwrap_or(0))
}

/// Collect each output across sub-runs into a list; outputs missing from any
/// sub-run are dropped.
fn gather_outputs(
    node: &Node,
    subresults: Vec<NodeResult>,
) -> (BTreeMap<String, Value>, Vec<InterfaceResult>) {
    let mut outputs = BTreeMap::new();
    for output in &node.spec.outputs {
        let values: Option<Vec<Value>> = subresults
            .iter()
            .map(|sub| sub.outputs.get(&output.name).cloned())
            .collect();
        match values {
            Some(values) => {
                outputs.insert(output.name.clone(), Value::List(values));
            }
            None if subresults.iter().any(|sub| sub.outputs.contains_key(&output.name)) => {
                warn!(node = %node.name, output = %output.name, "output missing from some map runs, dropping it");
            }
            None => {}
        }
    }
    let runs = subresults.into_iter().flat_map(|sub| sub.runs).collect();
    (outputs, runs)
}

fn run_cached<F>(
    node: &Node,
    name: &str,
    inputs: &BTreeMap<String, Value>,
    map_fields: &[String],
    cache: &NodeCache,
    options: &NodeOptions,
    body: F,
) -> Result<NodeOutcome>
where
    F: FnOnce(&NodeCache) -> Result<(BTreeMap<String, Value>, Vec<InterfaceResult>)>,
{
    let spec = &node.spec;
    let missing = check_existing(spec, inputs);
    if !missing.is_empty() {
        return Err(anyhow!("invalid inputs: {}", missing.join("; ")));
    }
    let fingerprints = fingerprint_all(&fingerprinted_paths(spec, inputs), options.hash_method)?;
    let doc = hash_document(spec, inputs, map_fields, &fingerprints);
    let hash = node_hash(&doc);

    if !node.overwrite
        && let Some(result) = cache.current_result(spec, &hash)
    {
        info!(node = name, "cache current, skipping run");
        return Ok(NodeOutcome {
            result,
            cached: true,
        });
    }
    if let Some(previous) = cache.stored_document()
        && previous != doc
    {
        info!(node = name, changed = ?diff_entries(&previous, &doc), "inputs changed, rerunning");
    }

    cache.reset(!map_fields.is_empty())?;
    cache.write_hash(&hash, &doc)?;
    let (outputs, runs) = body(cache)?;

    let result = NodeResult {
        node: name.to_string(),
        hash,
        outputs,
        runs,
    };
    let cmdlines: Vec<String> = result
        .runs
        .iter()
        .map(|run| run.runtime.cmdline.clone())
        .collect();
    cache.write_command(&cmdlines)?;
    cache.write_report(&render_report(&result, NodeStatus::Succeeded, cache.dir())?)?;
    cache.write_result(&result)?;
    Ok(NodeOutcome {
        result,
        cached: false,
    })
}
