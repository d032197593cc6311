//! Spawns the `pipeline` binary and checks output and exit codes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use pipeline::exit_codes;

const COPY_DEFINITION: &str = r#"{
  "name": "coreutils.cp",
  "command": "cp",
  "inputs": [
    { "name": "src", "kind": { "type": "file", "exists": true }, "mandatory": true, "argstr": "%s", "position": 0 },
    {
      "name": "dst",
      "kind": { "type": "file", "exists": false },
      "argstr": "%s",
      "position": 1,
      "name_source": "src",
      "name_template": "%s_copy",
      "keep_extension": true,
      "hash_files": false
    }
  ],
  "outputs": [
    { "name": "copied", "kind": { "type": "file" }, "source": { "from": "input", "field": "dst" } }
  ]
}
"#;

const FALSE_DEFINITION: &str = r#"{ "name": "coreutils.false", "command": "false" }
"#;

const COPY_WORKFLOW: &str = r#"
name = "copies"
interfaces = ["defs"]

[[nodes]]
name = "first"
interface = "coreutils.cp"
inputs = { src = "data/scan.txt" }

[[nodes]]
name = "second"
interface = "coreutils.cp"

[[connections]]
from = "first.copied"
to = "second.src"
"#;

fn pipeline(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pipeline"))
        .current_dir(dir)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn pipeline")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn copy_project() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("defs")).expect("defs");
    fs::create_dir_all(temp.path().join("data")).expect("data");
    fs::write(temp.path().join("defs/cp.json"), COPY_DEFINITION).expect("definition");
    fs::write(temp.path().join("data/scan.txt"), "voxels").expect("input");
    fs::write(temp.path().join("copies.toml"), COPY_WORKFLOW).expect("workflow");
    temp
}

#[test]
fn list_includes_builtin_interfaces() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pipeline(temp.path(), &["list"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let listed = stdout(&output);
    assert!(listed.lines().any(|line| line.starts_with("fsl.bet\tbet")), "{listed}");
    assert!(listed.contains("mrtrix3.mrconvert\tmrconvert"), "{listed}");
}

#[test]
fn list_loads_extra_definitions() {
    let temp = copy_project();
    let output = pipeline(temp.path(), &["list", "--interfaces", "defs"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(stdout(&output).contains("coreutils.cp\tcp"));
}

#[test]
fn check_reports_invalid_definitions() {
    let temp = copy_project();
    fs::write(temp.path().join("bad.json"), r#"{ "name": "broken" }"#).expect("bad");

    let ok = pipeline(temp.path(), &["check", "defs/cp.json"]);
    assert_eq!(ok.status.code(), Some(exit_codes::OK));
    assert!(stdout(&ok).contains("ok: coreutils.cp"));

    let bad = pipeline(temp.path(), &["check", "defs/cp.json", "bad.json"]);
    assert_eq!(bad.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&bad.stderr).contains("invalid: bad.json"));
}

#[test]
fn cmdline_prints_the_builtin_command() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pipeline(
        temp.path(),
        &[
            "cmdline",
            "fsl.bet",
            "--set",
            "in_file=/data/t1.nii.gz",
            "--set",
            "frac=0.3",
            "--cwd",
            "/work",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        stdout(&output),
        "bet /data/t1.nii.gz /work/t1_brain.nii.gz -f 0.30\n"
    );
}

#[test]
fn cmdline_rejects_values_of_the_wrong_kind() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pipeline(
        temp.path(),
        &["cmdline", "fsl.bet", "--set", "frac=high"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn graph_prints_stages_and_dot() {
    let temp = copy_project();
    let stages = pipeline(temp.path(), &["graph", "copies.toml"]);
    assert_eq!(stages.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&stages), "stage 0: first\nstage 1: second\n");

    let dot = pipeline(temp.path(), &["graph", "copies.toml", "--dot"]);
    assert_eq!(dot.status.code(), Some(exit_codes::OK));
    assert!(stdout(&dot).contains("\"first\" -> \"second\" [label=\"copied -> src\"];"));
}

#[test]
fn run_executes_then_reuses_cache_then_cleans() {
    let temp = copy_project();

    let first = pipeline(temp.path(), &["run", "copies.toml"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK), "{}", stdout(&first));
    assert!(stdout(&first).contains("succeeded second"));
    let copied = temp.path().join("copies/second/scan_copy_copy.txt");
    assert_eq!(fs::read_to_string(&copied).expect("copy"), "voxels");

    let again = pipeline(temp.path(), &["run", "copies.toml"]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));
    assert!(stdout(&again).contains("cached    first"));
    assert!(stdout(&again).contains("cached    second"));

    let forced = pipeline(temp.path(), &["run", "copies.toml", "--overwrite", "--plugin", "multiproc"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
    assert!(stdout(&forced).contains("succeeded first"));

    let clean = pipeline(temp.path(), &["clean", "copies.toml"]);
    assert_eq!(clean.status.code(), Some(exit_codes::OK));
    assert!(!temp.path().join("copies").exists());
}

#[test]
fn run_with_failing_node_exits_with_failed_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("defs")).expect("defs");
    fs::write(temp.path().join("defs/false.json"), FALSE_DEFINITION).expect("definition");
    fs::write(
        temp.path().join("broken.toml"),
        "name = \"broken\"\ninterfaces = [\"defs\"]\n\n[[nodes]]\nname = \"fails\"\ninterface = \"coreutils.false\"\n",
    )
    .expect("workflow");

    let output = pipeline(temp.path(), &["run", "broken.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(stdout(&output).contains("failed    fails"));
    assert!(temp.path().join("broken/crash").is_dir());
}

#[test]
fn run_rejects_invalid_config() {
    let temp = copy_project();
    fs::write(temp.path().join("pipeline.toml"), "[plugin]\nn_procs = 0\n").expect("config");
    let output = pipeline(temp.path(), &["run", "copies.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(!temp.path().join("copies").exists());
}
