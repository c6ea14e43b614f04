//! External tools (model CLI, `dataform`, `bq`) run as child processes.
//!
//! Every call is bounded by a wall-clock timeout and by the number of output
//! bytes kept in memory. Pipes are drained on reader threads while the tool
//! runs.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// A configured external tool.
#[derive(Debug, Clone)]
pub struct Tool {
    label: &'static str,
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

/// Result of one tool invocation.
#[derive(Debug)]
pub struct ToolRun {
    label: &'static str,
    limit: usize,
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

/// Bytes kept from one output stream and how many were dropped.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        let keep = chunk.len().min(room);
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

impl Tool {
    pub fn new(
        label: &'static str,
        argv: &[String],
        timeout_secs: u64,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            label,
            argv: argv.to_vec(),
            timeout: Duration::from_secs(timeout_secs),
            output_limit_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, extra_args: &[String], workdir: Option<&Path>) -> Result<Command> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("{} command must be a non-empty array", self.label))?;
        let mut cmd = Command::new(program);
        cmd.args(args).args(extra_args);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    /// Run the tool with `extra_args` appended to its configured argv.
    ///
    /// A tool that overruns its timeout is killed; the run is still returned
    /// with `timed_out` set so callers can inspect partial output.
    #[instrument(skip_all, fields(tool = self.label, timeout_secs = self.timeout.as_secs()))]
    pub fn run(
        &self,
        extra_args: &[String],
        stdin: Option<&[u8]>,
        workdir: Option<&Path>,
    ) -> Result<ToolRun> {
        let mut cmd = self.command(extra_args, workdir)?;
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        debug!(program = ?cmd.get_program(), "spawning tool");
        let mut child = cmd.spawn().map_err(|err| {
            error!(err = %err, program = ?cmd.get_program(), "failed to spawn tool");
            anyhow::Error::new(err).context(format!("spawn {} ({:?})", self.label, cmd.get_program()))
        })?;

        let limit = self.output_limit_bytes;
        let stdout = drain(child.stdout.take(), limit, "stdout")?;
        let stderr = drain(child.stderr.take(), limit, "stderr")?;

        if let Some(input) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            pipe.write_all(input)
                .with_context(|| format!("write {} stdin", self.label))?;
            // Closing the pipe signals EOF.
            drop(pipe);
        }

        let (status, timed_out) = match child.wait_timeout(self.timeout).context("wait for tool")? {
            Some(status) => (status, false),
            None => {
                warn!("tool timed out, killing");
                child.kill().context("kill tool")?;
                (child.wait().context("wait for killed tool")?, true)
            }
        };

        let stdout = join(stdout).context("collect stdout")?;
        let stderr = join(stderr).context("collect stderr")?;
        if stdout.dropped > 0 || stderr.dropped > 0 {
            warn!(
                stdout_dropped = stdout.dropped,
                stderr_dropped = stderr.dropped,
                "tool output truncated"
            );
        }
        debug!(exit_code = ?status.code(), timed_out, "tool finished");

        Ok(ToolRun {
            label: self.label,
            limit,
            status,
            stdout,
            stderr,
            timed_out,
        })
    }
}

impl ToolRun {
    /// Error unless the tool finished in time with a zero exit status.
    pub fn ensure_success(&self) -> Result<()> {
        if self.timed_out {
            return Err(anyhow!("{} timed out", self.label));
        }
        if !self.status.success() {
            return Err(anyhow!(
                "{} failed with status {:?}: {}",
                self.label,
                self.status.code(),
                self.stderr.text().trim()
            ));
        }
        Ok(())
    }

    /// Full stdout of a successful run; truncated output is an error.
    pub fn complete_stdout(&self) -> Result<String> {
        self.ensure_success()?;
        if self.stdout.dropped > 0 {
            return Err(anyhow!("{} output exceeded {} bytes", self.label, self.limit));
        }
        Ok(self.stdout.text())
    }
}

fn drain<R>(stream: Option<R>, limit: usize, name: &str) -> Result<JoinHandle<Result<Captured>>>
where
    R: Read + Send + 'static,
{
    let mut stream = stream.ok_or_else(|| anyhow!("{name} was not piped"))?;
    Ok(thread::spawn(move || {
        let mut captured = Captured::default();
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).context("read tool output")?;
            if n == 0 {
                return Ok(captured);
            }
            captured.push(&chunk[..n], limit);
        }
    }))
}

fn join(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}
