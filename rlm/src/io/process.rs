//! Child processes with a deadline and bounded output capture.
//!
//! Used by the `run_tests` skill and the code review finalizer. Output is
//! drained on reader threads while the child runs so a chatty test suite can
//! not deadlock on a full pipe.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Render stdout and stderr as one block of observation text.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!("\n[stdout truncated {} bytes]", self.stdout_truncated));
        }
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&stderr);
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!("\n[stderr truncated {} bytes]", self.stderr_truncated));
        }
        if self.timed_out {
            buf.push_str("\n[timed out]");
        }
        buf.trim_end().to_string()
    }
}

/// Run `cmd` with a deadline, capturing stdout/stderr.
///
/// `output_limit_bytes` bounds what is kept per stream; bytes beyond it are
/// still drained from the pipe and counted as truncated. On timeout the
/// child is killed and `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;
    let stdout = Captured::spawn(child.stdout.take(), "stdout", output_limit_bytes)?;
    let stderr = Captured::spawn(child.stderr.take(), "stderr", output_limit_bytes)?;

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "deadline passed, killing child");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    let stdout = stdout.join()?;
    let stderr = stderr.join()?;
    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.kept,
        stderr: stderr.kept,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        timed_out,
    })
}

/// Bytes kept from one stream plus the count dropped past the limit.
struct Drained {
    kept: Vec<u8>,
    truncated: usize,
}

/// A reader thread draining one child pipe.
struct Captured {
    label: &'static str,
    handle: thread::JoinHandle<Result<Drained>>,
}

impl Captured {
    fn spawn<R>(pipe: Option<R>, label: &'static str, limit: usize) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let pipe = pipe.ok_or_else(|| anyhow!("{label} was not piped"))?;
        Ok(Self {
            label,
            handle: thread::spawn(move || drain_limited(pipe, limit)),
        })
    }

    fn join(self) -> Result<Drained> {
        self.handle
            .join()
            .map_err(|_| anyhow!("{} reader thread panicked", self.label))?
            .with_context(|| format!("read {}", self.label))
    }
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<Drained> {
    let mut kept = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(Drained { kept, truncated });
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        truncated += n - room;
    }
}
