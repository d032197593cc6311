//! Interfaces driving real processes through `ProcessRunner`.
//!
//! Uses only tools found on any Unix host (`cp`, `echo`, `false`, `sleep`).

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use pipeline::interface::{Interface, RunOptions};
use pipeline::io::executor::ProcessRunner;
use pipeline::node::{Node, NodeOptions, run_node};
use pipeline::spec::{
    FieldKind, InputField, InterfaceSpec, OutputField, OutputSource, TerminalOutput,
};
use pipeline::test_support::TestWorkspace;
use pipeline::value::Value;

fn interface(
    name: &str,
    command: &str,
    inputs: Vec<InputField>,
    outputs: Vec<OutputField>,
) -> InterfaceSpec {
    InterfaceSpec {
        name: name.to_string(),
        command: command.to_string(),
        description: String::new(),
        terminal_output: TerminalOutput::Allatonce,
        env: BTreeMap::new(),
        inputs,
        outputs,
    }
}

fn positional(name: &str, kind: FieldKind, argstr: &str, position: i32) -> InputField {
    let mut field = InputField::new(name, kind);
    field.argstr = Some(argstr.to_string());
    field.position = Some(position);
    field
}

fn output(name: &str, kind: FieldKind, source: OutputSource) -> OutputField {
    OutputField {
        name: name.to_string(),
        kind,
        desc: String::new(),
        source,
        when: None,
        optional: false,
    }
}

fn int() -> FieldKind {
    FieldKind::Int {
        min: None,
        max: None,
    }
}

fn copy_spec() -> Arc<InterfaceSpec> {
    let mut src = positional("src", FieldKind::File { exists: true }, "%s", 0);
    src.mandatory = true;
    let mut dst = positional("dst", FieldKind::File { exists: false }, "%s", 1);
    dst.name_source = Some("src".to_string());
    dst.name_template = Some("%s_copy".to_string());
    dst.keep_extension = true;
    dst.hash_files = false;
    Arc::new(interface(
        "coreutils.cp",
        "cp",
        vec![src, dst],
        vec![output(
            "copied",
            FieldKind::File { exists: false },
            OutputSource::Input {
                field: "dst".to_string(),
            },
        )],
    ))
}

fn echo_spec(mode: TerminalOutput) -> Arc<InterfaceSpec> {
    let mut spec = interface(
        "coreutils.echo",
        "echo",
        vec![positional("number", int(), "%d", 0)],
        vec![output("echoed", int(), OutputSource::Stdout)],
    );
    spec.terminal_output = mode;
    Arc::new(spec)
}

#[test]
fn cp_creates_generated_output_and_caches() {
    let workspace = TestWorkspace::new().expect("workspace");
    let src = workspace.file("scan.nii.gz", "voxels").expect("input");
    let node = Node::new("copy", copy_spec()).with_input("src", &src);
    let dir = workspace.path().join("work/copy");
    let runner = ProcessRunner::default();

    let outcome =
        run_node(&node, &node.inputs, &dir, &runner, &NodeOptions::default()).expect("run");
    assert!(!outcome.cached);
    let copied = dir.join("scan_copy.nii.gz");
    assert_eq!(outcome.result.outputs["copied"], Value::from(&copied));
    assert_eq!(fs::read_to_string(&copied).expect("read copy"), "voxels");

    let again =
        run_node(&node, &node.inputs, &dir, &runner, &NodeOptions::default()).expect("rerun");
    assert!(again.cached);
}

#[test]
fn echo_stdout_becomes_a_typed_output() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut echo = Interface::new(echo_spec(TerminalOutput::Allatonce));
    echo.set("number", 42).expect("set");
    let result = echo
        .run(&ProcessRunner::default(), workspace.path(), &RunOptions::default())
        .expect("run");
    assert_eq!(result.outputs["echoed"], Value::Int(42));
    assert_eq!(result.runtime.cmdline, "echo 42");
    assert_eq!(result.runtime.returncode, Some(0));
}

#[test]
fn file_mode_writes_stream_logs() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut echo = Interface::new(echo_spec(TerminalOutput::File));
    echo.set("number", 7).expect("set");
    let cwd = workspace.path().join("echo");
    echo.run(&ProcessRunner::default(), &cwd, &RunOptions::default())
        .expect("run");
    assert_eq!(
        fs::read_to_string(cwd.join("stdout.log")).expect("stdout.log"),
        "7\n"
    );
    assert!(cwd.join("stderr.log").is_file());
}

#[test]
fn false_reports_its_exit_code() {
    let workspace = TestWorkspace::new().expect("workspace");
    let spec = Arc::new(interface("coreutils.false", "false", Vec::new(), Vec::new()));
    let err = Interface::new(spec)
        .run(&ProcessRunner::default(), workspace.path(), &RunOptions::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("command exited with code 1: false"), "{err}");
}

#[test]
fn sleep_is_killed_at_the_timeout() {
    let workspace = TestWorkspace::new().expect("workspace");
    let spec = Arc::new(interface(
        "coreutils.sleep",
        "sleep",
        vec![positional("seconds", int(), "%d", 0)],
        Vec::new(),
    ));
    let mut sleep = Interface::new(spec);
    sleep.set("seconds", 5).expect("set");
    let options = RunOptions {
        timeout: Some(Duration::from_millis(200)),
        ..RunOptions::default()
    };
    let err = sleep
        .run(&ProcessRunner::default(), workspace.path(), &options)
        .unwrap_err()
        .to_string();
    assert!(err.contains("timed out"), "{err}");
}

#[test]
fn missing_program_is_reported_before_spawning() {
    let workspace = TestWorkspace::new().expect("workspace");
    let spec = Arc::new(interface(
        "missing.tool",
        "definitely-not-installed-pipeline-tool",
        Vec::new(),
        Vec::new(),
    ));
    let err = Interface::new(spec)
        .run(&ProcessRunner::default(), workspace.path(), &RunOptions::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("could not be found on host"), "{err}");
}
