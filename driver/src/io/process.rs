//! Helpers for running child processes with an optional timeout and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers get to drain once a timed-out child has been killed.
const KILL_GRACE: Duration = Duration::from_millis(500);

const READER_POLL: Duration = Duration::from_millis(10);

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
    pub fn stdout_truncated_notice(&self) -> String {
        truncated_notice("stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self) -> String {
        truncated_notice("stderr", self.stderr_truncated)
    }
}

fn truncated_notice(stream: &str, bytes: usize) -> String {
    if bytes > 0 {
        format!("\n[{stream} truncated {bytes} bytes]")
    } else {
        String::new()
    }
}

/// Run a command to completion and capture stdout/stderr without risking pipe deadlocks.
///
/// Both pipes are drained on reader threads while the child runs. With `timeout = None`
/// the call blocks until the child and anything holding its pipes exit. Otherwise the
/// child's whole process group is killed once the timeout elapses and `timed_out` is set;
/// output from descendants that still hold the pipes past the deadline is abandoned.
/// `output_limit_bytes` bounds what is kept per stream. Stdin is always closed.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
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

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let pid = child.id();
    let stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match timeout {
        None => child.wait().context("wait for command")?,
        Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "command timed out, killing"
                );
                timed_out = true;
                kill_group(pid);
                kill_child(&mut child)?;
                child.wait().context("wait command after kill")?
            }
        },
    };

    // Descendants may still hold the pipes after the direct child is gone.
    let reader_deadline = match timeout {
        None => None,
        Some(_) if timed_out => Some(Instant::now() + KILL_GRACE),
        Some(timeout) => Some((started + timeout).max(Instant::now() + KILL_GRACE)),
    };
    if !wait_for_readers(&[&stdout_reader, &stderr_reader], reader_deadline) {
        warn!("output pipes still open past the deadline, abandoning readers");
        timed_out = true;
        kill_group(pid);
    }

    let (stdout, stdout_truncated) = stdout_reader.finish().context("join stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish().context("join stderr")?;

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

/// Kill every process in the child's group. Best effort; unix only.
fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        let group = format!("-{pid}");
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!(?status, "process group kill reported failure"),
            Err(err) => debug!(err = %err, "could not run kill for process group"),
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn kill_child(child: &mut Child) -> Result<()> {
    match child.kill() {
        Ok(()) => Ok(()),
        // Already reaped.
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill command"),
    }
}

/// Wait until every reader finished or `deadline` passes. Returns whether all finished.
fn wait_for_readers(readers: &[&StreamReader], deadline: Option<Instant>) -> bool {
    loop {
        if readers.iter().all(|r| r.is_finished()) {
            return true;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        thread::sleep(READER_POLL);
    }
}

#[derive(Debug, Default)]
struct Captured {
    buf: Vec<u8>,
    truncated: usize,
}

/// A pipe drained on its own thread into a shared, size-capped buffer.
struct StreamReader {
    handle: thread::JoinHandle<Result<()>>,
    captured: Arc<Mutex<Captured>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);
        let handle = thread::spawn(move || read_stream_limited(reader, limit, &sink));
        Self { handle, captured }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Join a finished reader, or take what it captured so far and leave it detached.
    fn finish(self) -> Result<(Vec<u8>, usize)> {
        if self.handle.is_finished() {
            match self.handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(anyhow!("output reader thread panicked")),
            }
        }
        let mut captured = self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let captured = std::mem::take(&mut *captured);
        Ok((captured.buf, captured.truncated))
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.buf.len());
        let keep = n.min(remaining);
        captured.buf.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(())
}
