//! Helpers for running child processes and capturing their output.
//!
//! Both pipes are drained on reader threads while the child runs so a chatty
//! child cannot deadlock on a full pipe. Stdin, when given, is fed from its own
//! thread for the same reason.
//!
//! A child run with a timeout gets its own process group, and the whole group
//! is killed when the deadline passes. Readers still blocked on a pipe held by
//! an escaped descendant are abandoned after a short grace period.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Limits applied to a single child invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    /// Kill the child after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Keep at most this many bytes of each stream. `None` keeps everything.
    pub output_limit_bytes: Option<usize>,
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
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Spawn `cmd`, optionally feed `stdin`, and wait for it under `limits`.
///
/// Errors only when the child cannot be spawned or waited on; a nonzero exit
/// is reported through `CommandOutput::status`.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.map(|t| t.as_secs()), has_stdin = stdin.is_some()))]
pub fn run_captured(mut cmd: Command, stdin: Option<&[u8]>, limits: RunLimits) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if limits.timeout.is_some() {
        isolate_process_group(&mut cmd);
    }

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let writer = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            // Dropping the handle at the end of the closure closes the pipe.
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes.unwrap_or(usize::MAX);
    let (tx, rx) = mpsc::channel();
    let stdout_tx = tx.clone();
    thread::spawn(move || {
        let _ = stdout_tx.send((Stream::Stdout, read_stream_limited(stdout, limit)));
    });
    thread::spawn(move || {
        let _ = tx.send((Stream::Stderr, read_stream_limited(stderr, limit)));
    });

    let (status, timed_out) = wait_child(&mut child, limits.timeout)?;
    let captured = collect_output(&rx, timed_out)?;

    if let Some(handle) = writer.filter(|_| !timed_out) {
        match handle.join() {
            // A child that exits without reading its input closes the pipe on us.
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("child closed stdin early");
            }
            Ok(result) => result.context("write stdin")?,
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    let Captured {
        stdout,
        stdout_truncated,
        stderr,
        stderr_truncated,
    } = captured;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn wait_child(child: &mut Child, timeout: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait().context("wait for command")?, false));
    };
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_process_group(child)?;
            Ok((child.wait().context("wait command after kill")?, true))
        }
    }
}

/// How long readers may keep draining after a timed-out child was killed.
const READER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stdout_truncated: usize,
    stderr: Vec<u8>,
    stderr_truncated: usize,
}

type ReaderMessage = (Stream, Result<(Vec<u8>, usize)>);

fn collect_output(rx: &mpsc::Receiver<ReaderMessage>, timed_out: bool) -> Result<Captured> {
    let mut captured = Captured::default();
    for _ in 0..2 {
        let message = if timed_out {
            match rx.recv_timeout(READER_GRACE) {
                Ok(message) => message,
                Err(_) => {
                    warn!("output pipes still open after kill, abandoning readers");
                    break;
                }
            }
        } else {
            rx.recv()
                .map_err(|_| anyhow!("output reader thread panicked"))?
        };
        match message {
            (Stream::Stdout, result) => {
                (captured.stdout, captured.stdout_truncated) = result.context("read stdout")?;
            }
            (Stream::Stderr, result) => {
                (captured.stderr, captured.stderr_truncated) = result.context("read stderr")?;
            }
        }
    }
    Ok(captured)
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child and everything it spawned into its process group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => {
            debug!(%err, "killpg failed, killing child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
