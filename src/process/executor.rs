//! Bounded shell command execution
//!
//! Every command runs through `sh -c` in its own process group. The spawned
//! child is owned by a `ChildGuard` whose `Drop` kills the whole group and
//! reaps the leader, so the process is released on every exit path:
//! normal completion, timeout, cancellation, or an early `?` return.

use anyhow::{Context, Result};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use super::cancel::{CancellationToken, POLL_INTERVAL};

/// Timeout for collecting output from child process pipes
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum captured size per output stream (10MB)
const MAX_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// Result of running one shell command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// The command was killed because it exceeded its timeout
    pub timed_out: bool,
    /// The command was killed because the run was cancelled
    pub cancelled: bool,
}

impl CommandOutcome {
    /// Exited on its own with status 0
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }

    /// Whether the outcome could be determined at all
    pub fn completed(&self) -> bool {
        !self.timed_out && !self.cancelled
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Get a summary of the result
    pub fn summary(&self) -> String {
        let status = if self.cancelled {
            "CANCELLED"
        } else if self.timed_out {
            "TIMEOUT"
        } else if self.success() {
            "PASSED"
        } else {
            "FAILED"
        };
        format!(
            "{} - {} ({}ms, exit code: {:?})",
            status,
            self.command,
            self.duration.as_millis(),
            self.exit_code
        )
    }

    /// First lines of stderr, falling back to stdout
    pub fn error_excerpt(&self, max_lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        source
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(max_lines)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Owns a spawned child and kills its process group when dropped.
struct ChildGuard {
    child: Child,
    released: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            released: false,
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout)
    }

    /// Kill whatever is left of the process group and reap the leader.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        terminate_process_group(&mut self.child);
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Run a shell command with a timeout, honouring cancellation.
///
/// Returns `Err` only when the command could not be spawned or waited on.
/// Timeouts and cancellation are reported through the outcome flags.
pub fn run_shell_command(
    command: &str,
    working_dir: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutcome> {
    let start = Instant::now();
    let mut guard = ChildGuard::new(spawn_shell_command(command, working_dir)?);

    // Drain the pipes while waiting; a child blocked on a full pipe buffer
    // would otherwise never exit.
    let stdout_rx = drain_pipe(guard.child.stdout.take());
    let stderr_rx = drain_pipe(guard.child.stderr.take());

    let deadline = start + timeout;
    let wait = loop {
        if cancel.is_cancelled() {
            break WaitOutcome::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            break WaitOutcome::TimedOut;
        }
        let slice = POLL_INTERVAL.min(deadline - now);
        if let Some(status) = guard
            .wait_timeout(slice)
            .with_context(|| format!("Failed to wait for command: {command}"))?
        {
            break WaitOutcome::Exited(status);
        }
    };

    // Background grandchildren may still hold the pipes open
    guard.release();
    let duration = start.elapsed();

    let stdout = stdout_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string());
    let mut stderr = stderr_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[output collection timed out]".to_string());

    let (exit_code, timed_out, cancelled) = match wait {
        WaitOutcome::Exited(status) => (status.code(), false, false),
        WaitOutcome::TimedOut => {
            stderr.push_str(&format!(
                "\n[Process killed after {}s timeout]",
                timeout.as_secs()
            ));
            (None, true, false)
        }
        WaitOutcome::Cancelled => {
            stderr.push_str("\n[Process killed: cancelled]");
            (None, false, true)
        }
    };

    Ok(CommandOutcome {
        command: command.to_string(),
        exit_code,
        stdout,
        stderr,
        duration,
        timed_out,
        cancelled,
    })
}

/// Spawn a shell command as the leader of a new process group
fn spawn_shell_command(command: &str, working_dir: Option<&Path>) -> Result<Child> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn()
        .with_context(|| format!("Failed to spawn command: {command}"))
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    match pipe {
        Some(stream) => {
            thread::spawn(move || {
                let _ = tx.send(read_stream_to_string(stream));
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

/// Read a stream to string, capping the captured size at MAX_OUTPUT_SIZE.
///
/// Data past the cap is drained and discarded so the writer never sees a
/// broken pipe.
fn read_stream_to_string<R: Read>(mut stream: R) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let remaining = MAX_OUTPUT_SIZE.saturating_sub(buf.len());
                let to_copy = n.min(remaining);
                buf.extend_from_slice(&chunk[..to_copy]);
                if to_copy < n {
                    let mut discard = [0u8; 8192];
                    while stream.read(&mut discard).unwrap_or(0) > 0 {}
                    buf.extend_from_slice(b"\n[output truncated at 10MB]");
                    break;
                }
            }
            Err(_) => {
                if buf.is_empty() {
                    return "[error reading output]".to_string();
                }
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).to_string()
}

fn terminate_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        // ESRCH just means the group is already gone
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}
