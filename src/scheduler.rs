//! Scheduler: owns job lifecycle and ordering. Holds no
//! authoritative state itself — the [`JobStore`] is the source of truth —
//! but keeps an in-memory ready-queue for efficient dispatch and a small
//! table of cancellation handles for jobs currently executing.
//!
//! Grounded on `engine/worker/{enqueue,control,selection,
//! handoff}.rs`: `enqueue_transcode_job`'s id-mint-then-insert-then-signal
//! shape, `next_job_for_worker_locked`'s FIFO-pop-and-mark-processing,
//! `finish_job_and_try_start_next_locked`'s handoff, and the `*_bulk`
//! control operations (`cancel_jobs_bulk`, `restart_jobs_bulk`) which
//! generalize directly to `CancelAll`/`RetryAllFailed`.

use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::argument_builder::{self, ConversionOptions};
use crate::domain::{Batch, BatchId, BatchStatus, Event, Job, JobId, JobStatus};
use crate::error::SchedulerError;
use crate::event_bus::EventBus;
use crate::executor::{CancelToken, ExecutorOutcome};
use crate::job_store::JobStore;
use crate::notifications::{NotificationSink, QuiescenceTally};
use crate::sync_ext::MutexExt;
use crate::time::now_ms;

pub struct BatchSubmission {
    pub name_prefix: String,
    pub inputs: Vec<ConversionOptions>,
}

/// Min-heap key: FIFO by created-at, tie-broken by job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey(u64, JobId);

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    next_job_id: AtomicU64,
    ready: Mutex<BinaryHeap<Reverse<ReadyKey>>>,
    running_cancel_tokens: Mutex<HashMap<JobId, CancelToken>>,
    completed_since_notify: Mutex<QuiescenceTally>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, bus: Arc<EventBus>, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Scheduler {
            store,
            bus,
            sinks,
            next_job_id: AtomicU64::new(1),
            ready: Mutex::new(BinaryHeap::new()),
            running_cancel_tokens: Mutex::new(HashMap::new()),
            completed_since_notify: Mutex::new(QuiescenceTally::default()),
        }
    }

    /// Submits a batch, building one job per
    /// input via the ArgumentBuilder; a single input failing to build
    /// aborts the whole batch — batches are atomic — without
    /// partially inserting jobs for the inputs that did build. A batch is
    /// also rejected wholesale if any of its outputs collides with the
    /// output path of another job that is not yet terminal, since two
    /// jobs racing to write the same file would silently clobber one
    /// another's output.
    pub fn submit_batch(&self, submission: BatchSubmission) -> Result<BatchId, SchedulerError> {
        if submission.inputs.is_empty() {
            return Err(SchedulerError::EmptyBatch);
        }

        let arg_vectors: Vec<_> = submission
            .inputs
            .iter()
            .map(argument_builder::build)
            .collect::<Result<_, _>>()?;

        let mut known_outputs: Vec<(JobId, PathBuf)> = self
            .store
            .list_jobs()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| (j.id, j.output_path))
            .collect();
        for vector in &arg_vectors {
            if let Some((existing_id, _)) = known_outputs.iter().find(|(_, path)| *path == vector.output_path) {
                return Err(SchedulerError::OutputCollision(*existing_id));
            }
            // A placeholder id only used to detect collisions between two
            // inputs within this same batch; the real id is minted below.
            known_outputs.push((0, vector.output_path.clone()));
        }

        let batch_id = ulid::Ulid::new().to_string();
        let now = now_ms();
        let batch = Batch {
            id: batch_id.clone(),
            total_files: arg_vectors.len() as u32,
            created_count: 0,
            status: BatchStatus::Creating,
            error_message: None,
            created_at_ms: now,
        };
        self.store.insert_batch(batch)?;

        for (index, vector) in arg_vectors.into_iter().enumerate() {
            let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
            let job = Job {
                id: job_id,
                name: format!("{}-{index}", submission.name_prefix),
                input_path: vector.input_path.clone(),
                output_path: vector.output_path.clone(),
                args: vector.args,
                status: JobStatus::Pending,
                progress: 0,
                error_message: None,
                created_at_ms: now,
                updated_at_ms: now,
                completed_at_ms: None,
                retried: false,
                cleared: false,
                batch_id: batch_id.clone(),
                assigned_worker: None,
                config_fingerprint: 0,
            };
            self.store.insert_job(job)?;
            self.enqueue_ready(job_id, now);
            self.bus.publish(Event::JobCreated {
                job_id,
                batch_id: batch_id.clone(),
            });
        }

        self.store.update_batch(&batch_id, &mut |b| {
            b.created_count = b.total_files;
            b.status = BatchStatus::Completed;
        })?;
        self.bus.publish(Event::BatchProgress {
            batch_id: batch_id.clone(),
            created_count: submission.inputs_len(),
            total_files: submission.inputs_len(),
            status: BatchStatus::Completed,
        });

        Ok(batch_id)
    }

    /// Retries a job. The in-place reset is authoritative:
    /// there is no parallel "submit with a remembered configKey" path in
    /// this crate (see DESIGN.md's resolved Open Question). Only a job
    /// currently `failed` or `cancelled` is retryable; the eligibility
    /// check and the reset happen inside the same store mutation so a
    /// concurrent transition can't slip in between them.
    pub fn retry(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let now = now_ms();
        let mut status_at_entry = None;
        let updated = self.store.update_job(job_id, &mut |job| {
            status_at_entry = Some(job.status);
            if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
                return;
            }
            job.progress = 0;
            job.error_message = None;
            job.status = JobStatus::Pending;
            job.retried = true;
            job.updated_at_ms = now;
            job.completed_at_ms = None;
            job.assigned_worker = None;
        })?;

        let Some(job) = updated else {
            return Err(SchedulerError::JobNotFound(job_id));
        };

        let status_at_entry = status_at_entry.expect("closure runs whenever the job exists");
        if !matches!(status_at_entry, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(SchedulerError::NotRetryable {
                job: job_id,
                status: status_at_entry,
            });
        }

        self.enqueue_ready(job_id, job.created_at_ms);
        self.bus.publish(Event::JobUpdated {
            job_id,
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
        });
        Ok(())
    }

    /// `RetryAllFailed()`: atomic over the currently-failed, not-yet-retried
    /// jobs observed at call time.
    pub fn retry_all_failed(&self) -> Result<usize, SchedulerError> {
        let targets: Vec<JobId> = self
            .store
            .list_jobs()
            .into_iter()
            .filter(|j| j.status == JobStatus::Failed && !j.retried)
            .map(|j| j.id)
            .collect();
        for job_id in &targets {
            self.retry(*job_id)?;
        }
        Ok(targets.len())
    }

    /// Cancels a job. A `pending` job transitions directly
    /// to `cancelled`; its stale ready-queue entry is lazily dropped the
    /// next time the Dispatcher pops it (see [`Scheduler::pop_ready`]). A
    /// `processing` job is cancelled cooperatively through the token the
    /// Dispatcher registered via [`Scheduler::register_running`].
    pub fn cancel(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let Some(job) = self.store.get_job(job_id) else {
            return Err(SchedulerError::JobNotFound(job_id));
        };

        match job.status {
            JobStatus::Pending => {
                let now = now_ms();
                self.store.update_job(job_id, &mut |job| {
                    job.status = JobStatus::Cancelled;
                    job.completed_at_ms = Some(now);
                    job.updated_at_ms = now;
                })?;
                self.bus.publish(Event::JobUpdated {
                    job_id,
                    status: JobStatus::Cancelled,
                    progress: job.progress,
                    error_message: None,
                });
                Ok(())
            }
            JobStatus::Processing => {
                if let Some(token) = self.running_cancel_tokens.lock_unpoisoned().get(&job_id) {
                    token.cancel();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `CancelAll()`: applies `Cancel` to `{pending, processing}` in one
    /// logical sweep over a point-in-time snapshot of the store.
    pub fn cancel_all(&self) -> Result<usize, SchedulerError> {
        let targets: Vec<JobId> = self
            .store
            .list_jobs()
            .into_iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .map(|j| j.id)
            .collect();
        for job_id in &targets {
            self.cancel(*job_id)?;
        }
        Ok(targets.len())
    }

    /// `ClearFinished()`: marks `cleared=true` on all terminal jobs.
    pub fn clear_finished(&self) -> Result<usize, SchedulerError> {
        let targets: Vec<JobId> = self
            .store
            .list_jobs()
            .into_iter()
            .filter(|j| j.status.is_terminal() && !j.cleared)
            .map(|j| j.id)
            .collect();
        for job_id in &targets {
            self.store.update_job(*job_id, &mut |job| job.cleared = true)?;
        }
        Ok(targets.len())
    }

    fn enqueue_ready(&self, job_id: JobId, created_at_ms: u64) {
        self.ready
            .lock_unpoisoned()
            .push(Reverse(ReadyKey(created_at_ms, job_id)));
    }

    /// Re-admits a job the caller has already reset to `pending` directly
    /// through the store (used by [`crate::dispatcher::LeaderDispatcher`]
    /// when a dead follower's in-flight job is requeued).
    pub fn requeue_existing(&self, job_id: JobId, created_at_ms: u64) {
        self.enqueue_ready(job_id, created_at_ms);
    }

    /// Pops the next eligible ready job, marking it `processing` in the
    /// store. Skips stale entries left behind by `Cancel`/`Retry` races
    /// (lazy deletion, grounded on `next_job_for_worker_locked`'s
    /// re-check-under-lock pattern).
    pub fn pop_ready(&self, worker_id: Option<String>) -> Result<Option<Job>, SchedulerError> {
        loop {
            let Reverse(ReadyKey(_, job_id)) = {
                let mut ready = self.ready.lock_unpoisoned();
                match ready.pop() {
                    Some(entry) => entry,
                    None => return Ok(None),
                }
            };

            let Some(existing) = self.store.get_job(job_id) else {
                continue;
            };
            if existing.status != JobStatus::Pending {
                continue;
            }

            let now = now_ms();
            let worker_id_clone = worker_id.clone();
            let updated = self
                .store
                .update_job(job_id, &mut |job| {
                    job.status = JobStatus::Processing;
                    job.assigned_worker = worker_id_clone.clone();
                    job.updated_at_ms = now;
                })?
                .expect("job existed a moment ago under the same store");

            self.bus.publish(Event::JobUpdated {
                job_id,
                status: JobStatus::Processing,
                progress: updated.progress,
                error_message: None,
            });
            return Ok(Some(updated));
        }
    }

    pub fn register_running(&self, job_id: JobId, token: CancelToken) {
        self.running_cancel_tokens.lock_unpoisoned().insert(job_id, token);
    }

    pub fn unregister_running(&self, job_id: JobId) {
        self.running_cancel_tokens.lock_unpoisoned().remove(&job_id);
    }

    pub fn report_progress(&self, job_id: JobId, progress_percent: u8) -> Result<(), SchedulerError> {
        let now = now_ms();
        self.store.update_job(job_id, &mut |job| {
            job.progress = progress_percent;
            job.updated_at_ms = now;
        })?;
        self.bus.publish(Event::JobUpdated {
            job_id,
            status: JobStatus::Processing,
            progress: progress_percent,
            error_message: None,
        });
        Ok(())
    }

    /// Records the terminal outcome of a job's execution, publishes the
    /// corresponding event, and re-evaluates quiescence.
    ///
    /// `worker_id` identifies whoever is reporting — `Some("standalone")`
    /// for the single-process Dispatcher, `Some(follower_id)` for a
    /// leader's follower. The report is only honored if the store still
    /// shows the job as `processing` *under that same worker*: a follower
    /// that reported after being marked dead and having its job requeued
    /// to someone else must not resurrect a job already handed away, even
    /// if that job happens to still read back as `processing`.
    pub fn report_terminal(
        &self,
        job_id: JobId,
        worker_id: Option<&str>,
        outcome: Result<ExecutorOutcome, String>,
    ) -> Result<(), SchedulerError> {
        self.unregister_running(job_id);
        let now = now_ms();

        let (status, error_message, tally_delta) = match outcome {
            Ok(ExecutorOutcome::Completed { .. }) => (JobStatus::Completed, None, (1, 0)),
            Ok(ExecutorOutcome::Cancelled { .. }) => (JobStatus::Cancelled, None, (0, 0)),
            Ok(ExecutorOutcome::Failed { reason, .. }) => (JobStatus::Failed, Some(reason), (0, 1)),
            Err(reason) => (JobStatus::Failed, Some(reason), (0, 1)),
        };

        let mut stale_report = false;
        let updated = self.store.update_job(job_id, &mut |job| {
            if job.status != JobStatus::Processing || job.assigned_worker.as_deref() != worker_id {
                stale_report = true;
                return;
            }
            job.status = status;
            job.progress = if status == JobStatus::Completed { 100 } else { job.progress };
            job.error_message = error_message.clone();
            job.completed_at_ms = Some(now);
            job.updated_at_ms = now;
            job.assigned_worker = None;
        })?;

        let Some(job) = updated else {
            return Err(SchedulerError::JobNotFound(job_id));
        };
        if stale_report {
            // The job was reassigned out from under this report; nothing
            // more to do (idempotent drop).
            return Ok(());
        }

        self.bus.publish(Event::JobUpdated {
            job_id,
            status: job.status,
            progress: job.progress,
            error_message: job.error_message.clone(),
        });

        {
            let mut tally = self.completed_since_notify.lock_unpoisoned();
            tally.completed += tally_delta.0;
            tally.failed += tally_delta.1;
        }

        self.check_quiescence();
        Ok(())
    }

    fn check_quiescence(&self) {
        let jobs = self.store.list_jobs();
        let pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
        let processing = jobs.iter().filter(|j| j.status == JobStatus::Processing).count();

        if pending == 0 && processing == 0 {
            let tally = {
                let mut guard = self.completed_since_notify.lock_unpoisoned();
                let tally = *guard;
                *guard = QuiescenceTally::default();
                tally
            };
            if tally.completed > 0 || tally.failed > 0 {
                for sink in &self.sinks {
                    sink.notify_quiescent(tally);
                }
            }
        }
    }
}

impl BatchSubmission {
    fn inputs_len(&self) -> u32 {
        self.inputs.len() as u32
    }
}
