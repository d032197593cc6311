//! Fixtures shared by unit and integration tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::executor::{CommandOutcome, CommandRequest, CommandRunner};
use crate::spec::{FieldKind, InputField, InterfaceSpec, OutputField, OutputSource, TerminalOutput};

/// A skull-stripping style definition exercising positions, generated names,
/// list and float formatting, xor/requires groups and guarded outputs.
pub fn bet_like_spec() -> InterfaceSpec {
    let mut in_file = InputField::new("in_file", FieldKind::File { exists: true });
    in_file.desc = "input image".to_string();
    in_file.argstr = Some("%s".to_string());
    in_file.position = Some(0);
    in_file.mandatory = true;

    let mut out_file = InputField::new("out_file", FieldKind::File { exists: false });
    out_file.argstr = Some("%s".to_string());
    out_file.position = Some(1);
    out_file.name_source = Some("in_file".to_string());
    out_file.name_template = Some("%s_brain".to_string());
    out_file.keep_extension = true;
    out_file.hash_files = false;

    let mut frac = InputField::new(
        "frac",
        FieldKind::Float {
            min: Some(0.0),
            max: Some(1.0),
        },
    );
    frac.argstr = Some("-f %.2f".to_string());

    let mut center = InputField::new(
        "center",
        FieldKind::List {
            item: Box::new(FieldKind::Int {
                min: None,
                max: None,
            }),
            min_len: Some(3),
            max_len: Some(3),
        },
    );
    center.argstr = Some("-c %s".to_string());

    let exclusive = ["robust", "functional", "reduce_bias"];
    let modes = [("robust", "-R"), ("functional", "-F"), ("reduce_bias", "-B")].map(
        |(name, flag)| {
            let mut field = flag_field(name, flag);
            field.xor = exclusive
                .iter()
                .filter(|other| **other != name)
                .map(|other| other.to_string())
                .collect();
            field
        },
    );

    let mut mesh = flag_field("mesh", "-e");
    mesh.requires = vec!["surfaces".to_string()];

    let mut inputs = vec![in_file, out_file, flag_field("mask", "-m"), frac, center];
    inputs.extend(modes);
    inputs.push(mesh);
    inputs.push(flag_field("surfaces", "-A"));

    InterfaceSpec {
        name: "fsl.bet".to_string(),
        command: "bet".to_string(),
        description: "Brain extraction".to_string(),
        terminal_output: TerminalOutput::Stream,
        env: BTreeMap::new(),
        inputs,
        outputs: vec![
            OutputField {
                name: "out_file".to_string(),
                kind: FieldKind::File { exists: false },
                desc: "skull-stripped image".to_string(),
                source: OutputSource::Input {
                    field: "out_file".to_string(),
                },
                when: None,
                optional: false,
            },
            OutputField {
                name: "mask_file".to_string(),
                kind: FieldKind::File { exists: false },
                desc: "binary brain mask".to_string(),
                source: OutputSource::Template {
                    template: "{{ out_file | strip_ext }}_mask.nii.gz".to_string(),
                },
                when: Some("mask".to_string()),
                optional: false,
            },
        ],
    }
}

fn flag_field(name: &str, flag: &str) -> InputField {
    let mut field = InputField::new(name, FieldKind::Bool);
    field.argstr = Some(flag.to_string());
    field
}

#[derive(Debug, Clone, Default)]
struct Script {
    touch: Vec<String>,
    stdout: String,
    failure: Option<(i32, String)>,
}

/// Runner that records requests and fakes a successful tool run: every
/// absolute argument inside the working directory is created, plus any
/// extra files registered with [`ScriptedRunner::touch`].
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: BTreeMap<String, Script>,
    calls: Mutex<Vec<CommandRequest>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also create these files (relative to the working directory) when `program` runs.
    pub fn touch(mut self, program: &str, files: &[&str]) -> Self {
        let script = self.scripts.entry(program.to_string()).or_default();
        script.touch.extend(files.iter().map(|file| file.to_string()));
        self
    }

    pub fn stdout(mut self, program: &str, text: &str) -> Self {
        self.scripts.entry(program.to_string()).or_default().stdout = text.to_string();
        self
    }

    /// Make `program` exit with `code`, writing `stderr` and no files.
    pub fn fail(mut self, program: &str, code: i32, stderr: &str) -> Self {
        self.scripts.entry(program.to_string()).or_default().failure =
            Some((code, stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let script = self.scripts.get(&request.program).cloned().unwrap_or_default();
        if let Some((code, stderr)) = script.failure {
            return Ok(CommandOutcome {
                exit_code: Some(code),
                stderr,
                ..CommandOutcome::default()
            });
        }

        let produced = request
            .args
            .iter()
            .map(PathBuf::from)
            .filter(|path| path.is_absolute() && path.starts_with(&request.cwd))
            .chain(script.touch.iter().map(|file| request.cwd.join(file)));
        for path in produced {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&path, request.args.join(" "))
                .with_context(|| format!("write {}", path.display()))?;
        }
        Ok(CommandOutcome {
            exit_code: Some(0),
            stdout: script.stdout,
            ..CommandOutcome::default()
        })
    }
}

/// Temporary directory holding input files for a test.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp dir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` (relative) and return the absolute path.
    pub fn file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
