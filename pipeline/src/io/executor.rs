//! Command runner abstraction for interface execution.
//!
//! The [`CommandRunner`] trait decouples interface orchestration from actual
//! process spawning. Tests use scripted runners that record requests and
//! create the expected outputs without spawning processes.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{Capture, run_command};
use crate::spec::TerminalOutput;

/// Lines of stderr carried into a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Parameters for one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory of the child; created by the caller.
    pub cwd: PathBuf,
    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    pub terminal_output: TerminalOutput,
    /// Kill the child after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Keep at most this many bytes of stdout and of stderr.
    pub output_limit_bytes: usize,
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over process execution backends.
pub trait CommandRunner: Sync {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutcome>;
}

/// Runner that spawns real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Resolve the program on `PATH` before spawning.
    pub check_command: bool,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            check_command: true,
        }
    }
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %request.program, cwd = %request.cwd.display()))]
    fn run(&self, request: &CommandRequest) -> Result<CommandOutcome> {
        if self.check_command && find_program(&request.program).is_none() {
            return Err(anyhow!(
                "command '{}' could not be found on host",
                request.program
            ));
        }

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.cwd)
            .envs(&request.env);

        let capture = match request.terminal_output {
            TerminalOutput::Stream => Capture::Stream,
            TerminalOutput::Allatonce | TerminalOutput::File => Capture::Collect,
            TerminalOutput::None => Capture::Discard,
        };
        info!(args = request.args.len(), "running command");
        let output = run_command(cmd, request.timeout, request.output_limit_bytes, capture)
            .with_context(|| format!("run {}", request.program))?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.stdout_truncated > 0 {
            stdout.push_str(&format!("\n[stdout truncated {} bytes]\n", output.stdout_truncated));
        }
        if output.stderr_truncated > 0 {
            stderr.push_str(&format!("\n[stderr truncated {} bytes]\n", output.stderr_truncated));
        }

        if request.terminal_output == TerminalOutput::File {
            write_log(&request.cwd.join("stdout.log"), &stdout)?;
            write_log(&request.cwd.join("stderr.log"), &stderr)?;
        }

        if output.timed_out {
            warn!(timeout = ?request.timeout, "command timed out");
        }
        debug!(exit_code = ?output.status.code(), "command completed");
        Ok(CommandOutcome {
            exit_code: output.status.code(),
            stdout,
            stderr,
            timed_out: output.timed_out,
            duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn write_log(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Resolve `program` the way the shell would: paths as given, bare names on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Turn a failed or timed-out outcome into an error carrying the command line
/// and the tail of stderr.
pub fn ensure_success(outcome: &CommandOutcome, cmdline: &str) -> Result<()> {
    if outcome.success() {
        return Ok(());
    }
    let tail = stderr_tail(&outcome.stderr);
    let reason = if outcome.timed_out {
        "timed out".to_string()
    } else {
        match outcome.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "was terminated by a signal".to_string(),
        }
    };
    if tail.is_empty() {
        Err(anyhow!("command {reason}: {cmdline}"))
    } else {
        Err(anyhow!("command {reason}: {cmdline}\nstderr:\n{tail}"))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(program: &str, args: &[&str], cwd: &Path, mode: TerminalOutput) -> CommandRequest {
        CommandRequest {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            cwd: cwd.to_path_buf(),
            env: BTreeMap::from([("PIPELINE_TEST_VAR".to_string(), "hello".to_string())]),
            terminal_output: mode,
            timeout: Some(Duration::from_secs(10)),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn missing_program_fails_before_spawn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::default();
        let err = runner
            .run(&request(
                "definitely-not-a-real-tool-xyz",
                &[],
                temp.path(),
                TerminalOutput::Allatonce,
            ))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "command 'definitely-not-a-real-tool-xyz' could not be found on host"
        );
    }

    #[test]
    fn file_mode_writes_logs_and_passes_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::default();
        let outcome = runner
            .run(&request(
                "sh",
                &["-c", "echo $PIPELINE_TEST_VAR; echo oops >&2"],
                temp.path(),
                TerminalOutput::File,
            ))
            .expect("run");
        assert!(outcome.success());
        assert_eq!(outcome.stdout, "hello\n");
        let logged = fs::read_to_string(temp.path().join("stderr.log")).expect("stderr.log");
        assert_eq!(logged, "oops\n");
    }

    #[test]
    fn failure_message_carries_exit_code_and_stderr_tail() {
        let outcome = CommandOutcome {
            exit_code: Some(3),
            stderr: "line 1\nline 2\n".to_string(),
            ..CommandOutcome::default()
        };
        let err = ensure_success(&outcome, "bet in.nii out.nii").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with code 3: bet in.nii out.nii"));
        assert!(message.ends_with("line 1\nline 2"));
    }

    #[test]
    fn resolves_programs_on_path() {
        assert!(find_program("sh").is_some());
        assert!(find_program("no-such-program-abc").is_none());
    }
}
