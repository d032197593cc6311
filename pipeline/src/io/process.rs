//! Helpers for running child processes with timeouts and bounded output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// What happens to the child's stdout/stderr while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Connect both streams to the null device.
    Discard,
    /// Collect into memory.
    Collect,
    /// Collect and log each line under the `pipeline::interface` target as it arrives.
    Stream,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub duration: Duration,
}

type Reader = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// Run a command with an optional timeout, capturing stdout/stderr without risking pipe
/// deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes, capture = ?capture))]
pub fn run_command(
    mut cmd: Command,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
    capture: Capture,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    if capture == Capture::Discard {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    } else {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let mut readers: Option<(Reader, Reader)> = None;
    if capture != Capture::Discard {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        let echo = capture == Capture::Stream;
        readers = Some((
            thread::spawn(move || read_lines_limited(stdout, output_limit_bytes, echo, "stdout")),
            thread::spawn(move || read_lines_limited(stderr, output_limit_bytes, echo, "stderr")),
        ));
    }

    let mut timed_out = false;
    let waited = match timeout {
        Some(limit) => child.wait_timeout(limit).context("wait for command")?,
        None => Some(child.wait().context("wait for command")?),
    };
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.map(|t| t.as_secs()),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };
    let duration = started.elapsed();

    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = match readers {
        Some((out, err)) => (
            join_output(out).context("join stdout")?,
            join_output(err).context("join stderr")?,
        ),
        None => ((Vec::new(), 0), (Vec::new(), 0)),
    };

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = duration.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        duration,
    })
}

fn join_output(handle: Reader) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally logging each line.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    echo: bool,
    stream: &'static str,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if echo {
            let text = String::from_utf8_lossy(&line);
            info!(target: "pipeline::interface", stream, "{}", text.trim_end());
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}
