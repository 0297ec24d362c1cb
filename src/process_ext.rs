//! Child-process execution helpers: bounded stderr capture, a polling
//! timeout/cancel loop, and incremental stdout chunk delivery for the
//! `-progress pipe:1` stream.
//!
//! Shaped after the classic
//! `run_command_with_timeout_capture_stderr` pattern (same bounded-capture-thread +
//! `try_wait`-polling-loop shape), extended with a cooperative cancellation
//! flag (a pending cancel request must interrupt a running encoder) and a
//! stdout callback so the caller can feed a [`crate::progress_parser::ProgressParser`]
//! as bytes arrive instead of only seeing the process's final output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub struct SpawnOutcome {
    pub status: ExitStatus,
    pub timed_out: bool,
    pub cancelled: bool,
    pub stderr_tail: Vec<u8>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Grace window between the graceful-stop signal and the unconditional
/// hard kill, for a cancelled (not timed-out) run.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Spawns `cmd` with stdout/stderr piped, polls for completion, and invokes
/// `on_stdout_chunk` with each lossily-decoded chunk of stdout as it
/// arrives. Returns once the child exits, the `timeout` elapses, or
/// `cancel` is observed set — in the latter two cases the child is killed.
pub fn run_with_timeout_and_cancellation(
    mut cmd: Command,
    timeout: Duration,
    cancel: &AtomicBool,
    stderr_capture_limit: usize,
    mut on_stdout_chunk: impl FnMut(&str),
) -> std::io::Result<SpawnOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child: Child = cmd.spawn()?;

    let stderr = child.stderr.take();
    let stderr_handle = std::thread::spawn(move || capture_bounded(stderr, stderr_capture_limit));

    let stdout = child.stdout.take();
    let (stdout_tx, stdout_rx) = mpsc::channel::<Vec<u8>>();
    let stdout_handle = std::thread::spawn(move || stream_chunks(stdout, stdout_tx));

    let start = Instant::now();
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        while let Ok(chunk) = stdout_rx.try_recv() {
            on_stdout_chunk(&String::from_utf8_lossy(&chunk));
        }

        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break escalate_to_stop(&mut child, CANCEL_GRACE, &stdout_rx, &mut on_stdout_chunk)?;
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            drop(child.kill());
            break child.wait()?;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    // Drain whatever arrived between the last poll and process exit.
    while let Ok(chunk) = stdout_rx.try_recv() {
        on_stdout_chunk(&String::from_utf8_lossy(&chunk));
    }

    let _ = stdout_handle.join();
    let stderr_tail = stderr_handle.join().unwrap_or_default();

    Ok(SpawnOutcome {
        status,
        timed_out,
        cancelled,
        stderr_tail,
    })
}

/// Sends a graceful stop request, then polls for exit until `grace`
/// elapses; any child still alive past that point is hard-killed.
fn escalate_to_stop(
    child: &mut Child,
    grace: Duration,
    stdout_rx: &mpsc::Receiver<Vec<u8>>,
    on_stdout_chunk: &mut impl FnMut(&str),
) -> std::io::Result<ExitStatus> {
    request_graceful_stop(child);
    let deadline = Instant::now() + grace;
    loop {
        while let Ok(chunk) = stdout_rx.try_recv() {
            on_stdout_chunk(&String::from_utf8_lossy(&chunk));
        }
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            drop(child.kill());
            return child.wait();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn request_graceful_stop(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn request_graceful_stop(child: &mut Child) {
    let _ = child.kill();
}

/// Retains only the last `limit` bytes read from `pipe`; older bytes are
/// dropped as new ones arrive, since an encoder's actionable error
/// typically appears at the tail of its stderr, not the head.
fn capture_bounded(pipe: Option<impl Read>, limit: usize) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut captured: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        captured.extend_from_slice(&buf[..n]);
        if captured.len() > limit {
            let excess = captured.len() - limit;
            captured.drain(..excess);
        }
    }
    captured
}

fn stream_chunks(pipe: Option<impl Read>, tx: mpsc::Sender<Vec<u8>>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if tx.send(buf[..n].to_vec()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_bounded_stderr() {
        // Only the tail survives once the pipe produces more than `limit`
        // bytes: "hello world" truncated to the last 5 bytes is "world".
        let bytes = capture_bounded(Some(&b"hello world"[..]), 5);
        assert_eq!(bytes, b"world");
    }

    #[test]
    fn capture_handles_missing_pipe() {
        let bytes: Vec<u8> = capture_bounded(None::<&[u8]>, 10);
        assert!(bytes.is_empty());
    }

    #[test]
    fn runs_a_short_lived_command_to_completion() {
        let mut cmd = Command::new("echo");
        cmd.arg("hi");
        let cancel = AtomicBool::new(false);
        let mut chunks = String::new();
        let outcome = run_with_timeout_and_cancellation(cmd, Duration::from_secs(5), &cancel, 64 * 1024, |s| {
            chunks.push_str(s);
        })
        .expect("spawn echo");
        assert!(outcome.status.success());
        assert!(!outcome.timed_out);
        assert!(!outcome.cancelled);
        assert!(chunks.contains("hi"));
    }

    #[test]
    fn cancellation_flag_kills_a_long_running_command() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let cancel = AtomicBool::new(true);
        let outcome = run_with_timeout_and_cancellation(cmd, Duration::from_secs(30), &cancel, 1024, |_| {})
            .expect("spawn sleep");
        assert!(outcome.cancelled);
        assert!(!outcome.status.success());
    }
}
