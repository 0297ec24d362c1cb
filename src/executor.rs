//! Executor: spawns the encoder child process for a single
//! job, parses its progress stream, enforces a wall-clock timeout, supports
//! cooperative cancellation, and reports a terminal [`ExecutorOutcome`].
//!
//! Grounded on `process_ext.rs` (bounded stderr capture +
//! `try_wait` polling loop, see [`crate::process_ext`]) and
//! `engine/worker/spawner.rs`'s `guarded_job_runner` (panic isolation via
//! `catch_unwind`), so that a panic inside the runner becomes a job-level
//! `ExecutorOutcome::Failed` instead of bringing down a Scheduler worker
//! thread — executor failures must never crash the Scheduler.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::argument_builder::{self, ArgVector};
use crate::error::ExecutorError;
use crate::progress_parser::{self, Progress, ProgressParser};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;
const DRY_RUN_STEPS: u8 = 5;
const DRY_RUN_STEP_DELAY: Duration = Duration::from_millis(5);

/// Cancellation handle shared between the Scheduler/Dispatcher and a
/// running [`Executor::run`] call. Setting it is a request, not a
/// guarantee of immediate termination: the encoder is killed on the next
/// `process_ext` poll tick.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `Execute(cmd)`'s result shape: a cancelled or failed run still carries
/// whatever stderr tail was captured, since the encoder's actionable error
/// is almost always at the tail of its own diagnostic output.
#[derive(Debug, Clone)]
pub enum ExecutorOutcome {
    Completed { stderr_tail: String },
    Cancelled { stderr_tail: String },
    Failed { reason: String, stderr_tail: String },
}

/// Runs a single encoder invocation. `on_progress` is called from the
/// executing thread for every completed progress block; it must not block
/// for long since it is on the critical path of reading the pipe.
pub struct Executor {
    timeout: Duration,
    dry_run: bool,
}

impl Executor {
    pub fn new() -> Self {
        Executor {
            timeout: DEFAULT_TIMEOUT,
            dry_run: false,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Executor {
            timeout,
            dry_run: false,
        }
    }

    /// An executor that never spawns the encoder: it validates and
    /// prepares the output directory exactly as a real run would, then
    /// synthesizes a linear progress curve and reports `Completed`.
    pub fn dry_run() -> Self {
        Executor {
            timeout: DEFAULT_TIMEOUT,
            dry_run: true,
        }
    }

    pub fn run(
        &self,
        arg_vector: &ArgVector,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<ExecutorOutcome, ExecutorError> {
        argument_builder::validate(arg_vector)?;

        if let Some(parent) = arg_vector.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(ExecutorError::OutputDirectory)?;
        }

        if self.dry_run {
            crate::debug_eprintln!("executor: dry-run, synthesizing progress instead of spawning {}", arg_vector.display_string);
            return Ok(run_dry(on_progress));
        }

        let mut cmd = Command::new(&arg_vector.args[0]);
        cmd.args(&arg_vector.args[1..]);

        let timeout = self.timeout;
        let cancel_flag = cancel.0.clone();
        let run_result = catch_unwind(AssertUnwindSafe(|| {
            run_guarded(cmd, timeout, &cancel_flag, &mut on_progress)
        }));

        match run_result {
            Ok(result) => result,
            Err(payload) => {
                let reason = format!("encoder runner panicked: {}", panic_payload_to_string(&*payload));
                crate::debug_eprintln!("executor: {reason}");
                Ok(ExecutorOutcome::Failed {
                    reason,
                    stderr_tail: String::new(),
                })
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Executor::new()
    }
}

fn run_dry(mut on_progress: impl FnMut(Progress)) -> ExecutorOutcome {
    for step in 1..=DRY_RUN_STEPS {
        let percent = (u32::from(step) * 100 / u32::from(DRY_RUN_STEPS)) as u8;
        on_progress(Progress {
            progress_percent: percent,
            done: percent >= 100,
            ..Progress::default()
        });
        if percent < 100 {
            std::thread::sleep(DRY_RUN_STEP_DELAY);
        }
    }
    ExecutorOutcome::Completed {
        stderr_tail: String::new(),
    }
}

fn run_guarded(
    cmd: Command,
    timeout: Duration,
    cancel_flag: &AtomicBool,
    on_progress: &mut impl FnMut(Progress),
) -> Result<ExecutorOutcome, ExecutorError> {
    let mut parser = ProgressParser::new(None);
    let mut duration_seeded = false;

    let outcome = crate::process_ext::run_with_timeout_and_cancellation(
        cmd,
        timeout,
        cancel_flag,
        STDERR_CAPTURE_LIMIT,
        |chunk| {
            if !duration_seeded
                && let Some(duration) = progress_parser::parse_duration_from_stderr_banner(chunk)
            {
                parser = ProgressParser::new(Some(duration));
                duration_seeded = true;
            }
            for snapshot in parser.feed(chunk) {
                on_progress(snapshot);
            }
        },
    )
    .map_err(ExecutorError::SpawnFailed)?;

    let stderr_tail = String::from_utf8_lossy(&outcome.stderr_tail).into_owned();

    if outcome.cancelled {
        crate::debug_eprintln!("executor: job killed by cancellation request");
        return Ok(ExecutorOutcome::Cancelled { stderr_tail });
    }
    if outcome.timed_out {
        let reason = "encoder wall-clock timeout exceeded".to_string();
        crate::debug_eprintln!("executor: {reason}");
        return Ok(ExecutorOutcome::Failed { reason, stderr_tail });
    }
    if !outcome.status.success() {
        let code = outcome.status.code().unwrap_or(-1);
        let reason = format!("encoder exited with non-zero status {code}");
        crate::debug_eprintln!("executor: {reason}, stderr tail: {stderr_tail}");
        return Ok(ExecutorOutcome::Failed { reason, stderr_tail });
    }

    Ok(ExecutorOutcome::Completed { stderr_tail })
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}
