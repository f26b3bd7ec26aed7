//! Child processes for command actions: JSON in on stdin, bounded capture
//! of stdout/stderr, and a wall-clock limit.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long a child may run and how much of each stream is kept.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Bytes kept from one output stream plus how many were dropped.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

/// Result of a finished (or killed) child.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

type Pending<T> = JoinHandle<Result<T>>;

/// Run `cmd` with `input` on stdin, killing it once `limits.timeout` passes.
///
/// Stdin is written and both output pipes are drained on their own threads,
/// so a chatty child never blocks on a full pipe.
#[instrument(skip_all, fields(timeout_ms = limits.timeout.as_millis() as u64))]
pub fn run_with_input(mut cmd: Command, input: Vec<u8>, limits: ProcessLimits) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning command");
    let mut child = cmd.spawn().map_err(|e| {
        error!(err = %e, "failed to spawn command");
        anyhow!(e).context("spawn command")
    })?;

    let writer = feed_stdin(&mut child, input)?;
    let (stdout_reader, stderr_reader) = drain_outputs(&mut child, limits.output_limit_bytes)?;

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_ms = limits.timeout.as_millis() as u64, "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    join(writer, "stdin writer")?;
    let stdout = join(stdout_reader, "stdout reader")?;
    let stderr = join(stderr_reader, "stderr reader")?;
    debug!(
        exit_code = ?status.code(),
        timed_out,
        stdout_dropped = stdout.dropped,
        stderr_dropped = stderr.dropped,
        "command finished"
    );

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn feed_stdin(child: &mut Child, input: Vec<u8>) -> Result<Pending<()>> {
    let mut pipe = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    Ok(thread::spawn(move || {
        // A child may exit without reading everything; that is not our error.
        match pipe.write_all(&input) {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                Err(e).context("write command stdin")
            }
            _ => Ok(()),
        }
    }))
}

fn drain_outputs(child: &mut Child, limit: usize) -> Result<(Pending<Captured>, Pending<Captured>)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    Ok((
        thread::spawn(move || capture(stdout, limit)),
        thread::spawn(move || capture(stderr, limit)),
    ))
}

fn join<T>(handle: Pending<T>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{what} thread panicked"))?
        .with_context(|| format!("{what} failed"))
}

/// Keep at most `limit` bytes of `reader`, counting and discarding the rest.
fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read command output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}
