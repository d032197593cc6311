//! CLI command implementations. Each returns the process exit code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use pipeline::core::types::NodeStatus;
use pipeline::engine::{Plugin, clean_workflow, run_workflow};
use pipeline::exit_codes;
use pipeline::interface::Interface;
use pipeline::io::config::{PluginName, load_config};
use pipeline::io::executor::ProcessRunner;
use pipeline::io::inputs::absolutize_inputs;
use pipeline::io::interface_store::load_interface;
use pipeline::io::workflow_file::load_workflow;
use pipeline::logging;
use pipeline::spec::InterfaceSpec;
use pipeline::value::Value;
use pipeline::workflow::Workflow;
use tracing::{debug, info};

/// Overrides `pipeline run` applies on top of the loaded config.
pub struct RunFlags {
    pub multiproc: Option<bool>,
    pub n_procs: Option<usize>,
    pub overwrite: bool,
}

pub fn list(interfaces: Option<&Path>) -> Result<i32> {
    logging::init("warn");
    let mut registry = catalog::registry()?;
    if let Some(dir) = interfaces {
        registry.load_dir(dir)?;
    }
    for spec in registry.specs() {
        if spec.description.is_empty() {
            println!("{}\t{}", spec.name, spec.command);
        } else {
            println!("{}\t{}\t{}", spec.name, spec.command, spec.description);
        }
    }
    Ok(exit_codes::OK)
}

/// Check every file, report each result, and fail if any is invalid.
pub fn check(files: &[PathBuf]) -> Result<i32> {
    logging::init("warn");
    let mut invalid = 0;
    for file in files {
        match load_interface(file) {
            Ok(spec) => println!("ok: {} ({})", spec.name, file.display()),
            Err(err) => {
                invalid += 1;
                eprintln!("invalid: {}: {err:#}", file.display());
            }
        }
    }
    if invalid > 0 {
        bail!("{invalid} of {} definition(s) invalid", files.len());
    }
    Ok(exit_codes::OK)
}

pub fn cmdline(interface: &str, sets: &[String], cwd: Option<&Path>) -> Result<i32> {
    logging::init("warn");
    let spec = resolve_interface(interface)?;
    let here = std::env::current_dir().context("read current directory")?;
    let cwd = cwd.map_or_else(|| here.clone(), |dir| here.join(dir));

    let mut inputs = BTreeMap::new();
    for set in sets {
        let (name, value) = parse_assignment(set)?;
        inputs.insert(name.to_string(), value);
    }
    let inputs = absolutize_inputs(&spec, &inputs, &here);

    let mut interface = Interface::new(spec);
    for (name, value) in inputs {
        interface.set(&name, value)?;
    }
    println!("{}", interface.cmdline(&cwd)?);
    Ok(exit_codes::OK)
}

pub fn graph(path: &Path, dot: bool) -> Result<i32> {
    logging::init("warn");
    let workflow = load(path)?;
    if dot {
        print!("{}", workflow.to_dot());
        return Ok(exit_codes::OK);
    }
    for (index, stage) in workflow.stages()?.iter().enumerate() {
        println!("stage {index}: {}", stage.join(" "));
    }
    Ok(exit_codes::OK)
}

pub fn run(path: &Path, config_path: &Path, flags: &RunFlags) -> Result<i32> {
    let mut config = load_config(config_path)?;
    logging::init(&config.logging.level);
    if let Some(multiproc) = flags.multiproc {
        config.plugin.name = if multiproc {
            PluginName::Multiproc
        } else {
            PluginName::Linear
        };
    }
    if let Some(n_procs) = flags.n_procs {
        config.plugin.n_procs = n_procs;
    }
    config.validate()?;

    let mut workflow = load(path)?;
    if flags.overwrite {
        for node in &mut workflow.nodes {
            node.overwrite = true;
        }
    }
    let runner = ProcessRunner {
        check_command: config.execution.check_command,
    };
    let outcome = run_workflow(
        &workflow,
        &runner,
        &config,
        Plugin::from_config(&config.plugin),
    )?;

    for (id, status) in &outcome.statuses {
        println!("{:<9} {id}", status.as_str());
    }
    println!("summary: {}", outcome.summary_path.display());
    if let Err(err) = outcome.ensure_success() {
        eprintln!("error: {err:#}");
        return Ok(exit_codes::FAILED);
    }
    info!(
        cached = outcome.with_status(NodeStatus::Cached).len(),
        "workflow succeeded"
    );
    Ok(exit_codes::OK)
}

pub fn clean(path: &Path) -> Result<i32> {
    logging::init("info");
    let workflow = load(path)?;
    let dir = workflow.workflow_dir();
    if clean_workflow(&workflow)? {
        println!("removed {}", dir.display());
    } else {
        println!("nothing to remove at {}", dir.display());
    }
    Ok(exit_codes::OK)
}

fn load(path: &Path) -> Result<Workflow> {
    let mut registry = catalog::registry()?;
    load_workflow(path, &mut registry)
}

/// A registry name, or a path to a definition file.
fn resolve_interface(interface: &str) -> Result<Arc<InterfaceSpec>> {
    let path = Path::new(interface);
    if path.extension().is_some_and(|ext| ext == "json") || path.is_file() {
        debug!(path = %path.display(), "loading interface from file");
        return Ok(Arc::new(load_interface(path)?));
    }
    catalog::registry()?
        .get(interface)
        .ok_or_else(|| anyhow!("unknown interface '{interface}' (see `pipeline list`)"))
}

/// `name=value`, where the value is JSON when it parses and a string otherwise.
fn parse_assignment(raw: &str) -> Result<(&str, Value)> {
    let (name, value) = raw
        .split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{raw}'"))?;
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::from(value));
    Ok((name, value))
}
