//! A single interface invocation: validate, assemble argv, execute, collect outputs.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::argv::{build_args, effective_inputs, render_cmdline};
use crate::core::outputs::resolve_outputs;
use crate::core::validate::{check_inputs, check_value};
use crate::io::executor::{CommandRequest, CommandRunner, ensure_success};
use crate::io::inputs::{absolutize_inputs, check_existing};
use crate::io::outputs::verify_outputs;
use crate::spec::InterfaceSpec;
use crate::value::Value;

/// Execution limits for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

/// What happened while the command ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub cmdline: String,
    pub cwd: PathBuf,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// RFC 3339 start time.
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceResult {
    pub interface: String,
    /// Effective inputs, generated names included.
    pub inputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    pub runtime: Runtime,
}

/// An interface definition paired with user inputs.
#[derive(Debug, Clone)]
pub struct Interface {
    spec: Arc<InterfaceSpec>,
    inputs: BTreeMap<String, Value>,
}

impl Interface {
    pub fn new(spec: Arc<InterfaceSpec>) -> Self {
        Self {
            spec,
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_inputs(spec: Arc<InterfaceSpec>, inputs: BTreeMap<String, Value>) -> Self {
        Self { spec, inputs }
    }

    pub fn spec(&self) -> &InterfaceSpec {
        &self.spec
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    /// Set an input after checking the field exists and the value fits its kind.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let field = self
            .spec
            .input(name)
            .ok_or_else(|| anyhow!("{}: unknown input '{}'", self.spec.name, name))?;
        let value = value.into();
        check_value(&field.kind, &value)
            .map_err(|err| anyhow!("{}: input '{}': {}", self.spec.name, name, err))?;
        self.inputs.insert(name.to_string(), value);
        Ok(self)
    }

    /// Every violation of the input rules, including missing must-exist paths.
    pub fn validate(&self) -> Result<()> {
        let mut errors = check_inputs(&self.spec, &self.inputs);
        errors.extend(check_existing(&self.spec, &self.inputs));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid inputs: {}", errors.join("; ")))
        }
    }

    /// Effective inputs and the full argv (program first) for a run in `cwd`.
    pub fn argv(&self, cwd: &Path) -> Result<(BTreeMap<String, Value>, Vec<String>)> {
        let effective = effective_inputs(&self.spec, &self.inputs, cwd).map_err(|err| anyhow!(err))?;
        let (program, mut argv) = self.spec.program_and_args();
        argv.extend(build_args(&self.spec, &effective).map_err(|err| anyhow!(err))?);
        argv.insert(0, program);
        Ok((effective, argv))
    }

    /// Shell-quoted command line as it would run in `cwd`.
    pub fn cmdline(&self, cwd: &Path) -> Result<String> {
        let (_, argv) = self.argv(cwd)?;
        Ok(render_cmdline(&argv))
    }

    /// Validate, execute in `cwd`, then resolve and verify outputs.
    #[instrument(skip_all, fields(interface = %self.spec.name, cwd = %cwd.display()))]
    pub fn run(
        &self,
        runner: &dyn CommandRunner,
        cwd: &Path,
        options: &RunOptions,
    ) -> Result<InterfaceResult> {
        let launch_dir = env::current_dir().context("resolve launch directory")?;
        let resolved = Self::with_inputs(
            Arc::clone(&self.spec),
            absolutize_inputs(&self.spec, &self.inputs, &launch_dir),
        );
        resolved.validate()?;

        fs::create_dir_all(cwd).with_context(|| format!("create {}", cwd.display()))?;
        let (effective, argv) = resolved.argv(cwd)?;
        let cmdline = render_cmdline(&argv);
        info!(%cmdline, "running interface");

        let mut tokens = argv.into_iter();
        let program = tokens.next().unwrap_or_default();
        let request = CommandRequest {
            program,
            args: tokens.collect(),
            cwd: cwd.to_path_buf(),
            env: self.spec.env.clone(),
            terminal_output: self.spec.terminal_output,
            timeout: options.timeout,
            output_limit_bytes: options.output_limit_bytes,
        };
        let started_at = Utc::now().to_rfc3339();
        let outcome = runner.run(&request)?;
        ensure_success(&outcome, &cmdline)?;

        let outputs = resolve_outputs(&self.spec, &effective, cwd, &outcome.stdout)
            .map_err(|err| anyhow!(err))?;
        let outputs = verify_outputs(&self.spec, outputs)?;
        debug!(outputs = outputs.len(), "outputs verified");

        Ok(InterfaceResult {
            interface: self.spec.name.clone(),
            inputs: effective,
            outputs,
            runtime: Runtime {
                cmdline,
                cwd: cwd.to_path_buf(),
                returncode: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                duration_ms: outcome.duration_ms,
                started_at,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedRunner, bet_like_spec};

    #[test]
    fn set_rejects_unknown_fields_and_bad_types() {
        let mut bet = Interface::new(Arc::new(bet_like_spec()));
        assert!(bet.set("frac", 0.4).is_ok());
        let err = bet.set("fraction", 0.4).unwrap_err().to_string();
        assert!(err.contains("unknown input 'fraction'"));
        let err = bet.set("frac", "high").unwrap_err().to_string();
        assert!(err.contains("expected float"));
        let err = bet.set("frac", 1.5).unwrap_err().to_string();
        assert!(err.contains("above the maximum"));
    }

    #[test]
    fn cmdline_generates_output_names_in_cwd() {
        let mut bet = Interface::new(Arc::new(bet_like_spec()));
        bet.set("in_file", "/data/t1.nii.gz")
            .and_then(|b| b.set("mask", true))
            .expect("set");
        assert_eq!(
            bet.cmdline(Path::new("/work")).expect("cmdline"),
            "bet /data/t1.nii.gz /work/t1_brain.nii.gz -m"
        );
    }

    #[test]
    fn run_executes_and_collects_outputs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("t1.nii.gz");
        fs::write(&input, "img").expect("write input");
        let cwd = temp.path().join("bet");

        let runner = ScriptedRunner::new().touch("bet", &["t1_brain_mask.nii.gz"]);
        let mut bet = Interface::new(Arc::new(bet_like_spec()));
        bet.set("in_file", &input)
            .and_then(|b| b.set("mask", true))
            .expect("set");
        let result = bet.run(&runner, &cwd, &RunOptions::default()).expect("run");

        assert_eq!(result.runtime.returncode, Some(0));
        assert_eq!(
            result.outputs["out_file"],
            Value::from(cwd.join("t1_brain.nii.gz"))
        );
        assert_eq!(
            result.outputs["mask_file"],
            Value::from(cwd.join("t1_brain_mask.nii.gz"))
        );
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "bet");
        assert_eq!(calls[0].cwd, cwd);
    }

    #[test]
    fn run_reports_missing_inputs_before_spawning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let mut bet = Interface::new(Arc::new(bet_like_spec()));
        bet.set("in_file", temp.path().join("absent.nii.gz"))
            .expect("set");
        let err = bet
            .run(&runner, temp.path(), &RunOptions::default())
            .unwrap_err()
            .to_string();
        assert!(err.contains("does not exist"));
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn failed_command_surfaces_exit_code_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("t1.nii.gz");
        fs::write(&input, "img").expect("write input");
        let runner = ScriptedRunner::new().fail("bet", 2, "Image Exception: bad header");
        let mut bet = Interface::new(Arc::new(bet_like_spec()));
        bet.set("in_file", &input).expect("set");
        let err = bet
            .run(&runner, &temp.path().join("bet"), &RunOptions::default())
            .unwrap_err()
            .to_string();
        assert!(err.contains("exited with code 2"));
        assert!(err.contains("Image Exception: bad header"));
    }
}
