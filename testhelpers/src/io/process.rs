//! Child process execution with a timeout and bounded output capture.

use std::ffi::OsStr;
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Limits applied to one external tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Bytes kept from one output stream plus the count of discarded bytes.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub discarded: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout.bytes).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr.bytes).trim().to_string()
    }
}

/// Run `program args...` and return stdout, failing on a non-zero exit or timeout.
///
/// The error message carries the command line and the trimmed stderr.
pub fn run_checked<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    stdin: Option<&[u8]>,
    limits: ProcessLimits,
) -> Result<String> {
    let rendered = render(program, args);
    debug!(command = %rendered, "running");

    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = run_command(cmd, stdin, limits).with_context(|| format!("run {rendered}"))?;

    if output.timed_out {
        return Err(anyhow!(
            "{rendered} timed out after {}s",
            limits.timeout.as_secs()
        ));
    }
    if !output.success() {
        return Err(anyhow!("{rendered} failed: {}", output.stderr_text()));
    }
    Ok(output.stdout_text())
}

/// Run a command under `limits`, feeding `stdin` and draining both output pipes
/// on helper threads so neither side can block the other.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: ProcessLimits,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow::Error::new(err).context("spawn command")
    })?;

    let limit = limits.output_limit_bytes;
    let stdout = spawn_reader(child.stdout.take(), limit).context("stdout was not piped")?;
    let stderr = spawn_reader(child.stderr.take(), limit).context("stderr was not piped")?;
    let feeder = match stdin {
        Some(input) => {
            let pipe = child.stdin.take().context("stdin was not piped")?;
            Some(spawn_feeder(pipe, input.to_vec()))
        }
        None => None,
    };

    let (status, timed_out) = wait_or_kill(&mut child, limits.timeout)?;

    let stdout = join(stdout).context("collect stdout")?;
    let stderr = join(stderr).context("collect stderr")?;
    if let Some(feeder) = feeder {
        // A child that exits without reading all of stdin closes the pipe early.
        if let Err(err) = join(feeder) {
            debug!(err = %err, "stdin not fully consumed");
        }
    }

    if stdout.discarded > 0 || stderr.discarded > 0 {
        warn!(
            stdout_discarded = stdout.discarded,
            stderr_discarded = stderr.discarded,
            "output truncated"
        );
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    child.kill().context("kill command")?;
    let status = child.wait().context("wait command after kill")?;
    Ok((status, true))
}

fn spawn_reader<R>(pipe: Option<R>, limit: usize) -> Option<JoinHandle<Result<Captured>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|pipe| thread::spawn(move || capture(pipe, limit)))
}

fn spawn_feeder<W>(mut pipe: W, input: Vec<u8>) -> JoinHandle<Result<()>>
where
    W: Write + Send + 'static,
{
    // The pipe is dropped when the thread ends, so the child sees EOF.
    thread::spawn(move || pipe.write_all(&input).context("write stdin"))
}

fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("process i/o thread panicked"))?
}

fn render<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    args.iter().fold(program.to_string(), |mut line, arg| {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
        line
    })
}

fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.discarded += n - keep;
    }
}
