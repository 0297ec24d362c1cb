//! Dispatcher: chooses a worker for each ready job and enforces worker
//! capacity.
//!
//! Standalone mode follows a `worker_loop` shape (wait on
//! lock-check-queue/`Condvar::wait`/recheck, then hand the ready job to
//! [`crate::executor::Executor`]). Leader mode (worker table, follower
//! health, dead-follower requeue) builds on the same `Mutex`-guarded-table
//! idea plus a heartbeat-driven liveness check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::domain::{Event, Follower, FollowerId, JobId};
use crate::error::DispatcherError;
use crate::event_bus::EventBus;
use crate::executor::{CancelToken, Executor, ExecutorOutcome};
use crate::job_store::JobStore;
use crate::scheduler::Scheduler;
use crate::sync_ext::{CondvarExt, MutexExt};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEAD_THRESHOLD: u32 = 3;

/// Runs a single-process, single-worker dispatch loop until `shutdown` is
/// signalled. Concurrency is 1 (serial), matching the standalone-mode
/// contract.
pub struct StandaloneDispatcher {
    scheduler: Arc<Scheduler>,
    executor: Executor,
    shutdown: Arc<AtomicBool>,
    wake: Arc<(Mutex<()>, Condvar)>,
}

impl StandaloneDispatcher {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        StandaloneDispatcher {
            scheduler,
            executor: Executor::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Wakes a blocked `run_once` loop (called after `SubmitBatch`/`Retry`
    /// enqueue new ready work), mirroring `spawner.rs`'s `inner.cv.notify_one()`.
    pub fn notify_work_available(&self) {
        self.wake.1.notify_one();
    }

    /// Runs one dispatch iteration: waits for a ready job (or shutdown),
    /// executes it to completion, and reports its terminal status. Returns
    /// `false` once shutdown is observed with no job to run, so callers can
    /// loop `while dispatcher.run_once() {}`.
    pub fn run_once(&self) -> bool {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }

            match self.scheduler.pop_ready(Some("standalone".to_string())) {
                Ok(Some(job)) => {
                    let cancel = CancelToken::new();
                    self.scheduler.register_running(job.id, cancel.clone());

                    let arg_vector = crate::argument_builder::ArgVector {
                        args: job.args.clone(),
                        display_string: String::new(),
                        input_path: job.input_path.clone(),
                        output_path: job.output_path.clone(),
                    };

                    let scheduler = self.scheduler.clone();
                    let job_id = job.id;
                    let outcome = self.executor.run(&arg_vector, &cancel, move |progress| {
                        if let Err(err) = scheduler.report_progress(job_id, progress.progress_percent) {
                            crate::debug_eprintln!("dispatcher: failed to record progress for job {job_id}: {err}");
                        }
                    });

                    let report = match outcome {
                        Ok(outcome) => Ok(outcome),
                        Err(err) => Err(err.to_string()),
                    };
                    if let Err(err) = self.scheduler.report_terminal(job.id, Some("standalone"), report) {
                        crate::debug_eprintln!("dispatcher: failed to report terminal outcome for job {job_id}: {err}");
                    }
                    return true;
                }
                Ok(None) => {
                    let guard = self.wake.0.lock_unpoisoned();
                    let (_guard, _timeout) = self.wake.1.wait_timeout_unpoisoned(guard, Duration::from_millis(200));
                    continue;
                }
                Err(_) => return true,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct WorkerEntry {
    follower: Follower,
}

/// Leader-mode dispatcher: a worker table keyed by follower id, guarded by
/// a single mutex.
pub struct LeaderDispatcher {
    scheduler: Arc<Scheduler>,
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    workers: Mutex<HashMap<FollowerId, WorkerEntry>>,
}

impl LeaderDispatcher {
    pub fn new(scheduler: Arc<Scheduler>, store: Arc<dyn JobStore>, bus: Arc<EventBus>) -> Self {
        LeaderDispatcher {
            scheduler,
            store,
            bus,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_follower(&self, follower: Follower) {
        self.bus.publish(Event::FollowerStatus {
            follower_id: follower.id.clone(),
            busy: follower.busy,
            dead: follower.dead,
        });
        self.workers
            .lock_unpoisoned()
            .insert(follower.id.clone(), WorkerEntry { follower });
    }

    /// Selects the first idle, live follower, tie-broken by oldest
    /// `last_assigned_ms` (round-robin), and marks it busy. Returns `None`
    /// if no follower is currently eligible.
    pub fn select_and_lease_follower(&self, job_id: JobId) -> Result<Option<FollowerId>, DispatcherError> {
        let mut workers = self.workers.lock_unpoisoned();
        let chosen = workers
            .values()
            .filter(|entry| !entry.follower.busy && !entry.follower.dead)
            .min_by_key(|entry| entry.follower.last_assigned_ms)
            .map(|entry| entry.follower.id.clone());

        let Some(follower_id) = chosen else {
            return Ok(None);
        };

        let now = crate::time::now_ms();
        if let Some(entry) = workers.get_mut(&follower_id) {
            entry.follower.busy = true;
            entry.follower.last_assigned_ms = now;
            entry.follower.current_job = Some(crate::domain::CurrentJobSnapshot {
                id: job_id,
                name: String::new(),
                progress: 0,
            });
        }
        Ok(Some(follower_id))
    }

    /// Heartbeat probe, run on a fixed interval. `probe` performs the
    /// actual liveness check (a real deployment hits the follower's health
    /// endpoint via `reqwest::blocking`); three consecutive failures flip
    /// `dead=true` and requeue any job the follower was holding.
    pub fn heartbeat_once(&self, probe: impl Fn(&str) -> bool) {
        let mut requeue: Vec<JobId> = Vec::new();
        {
            let mut workers = self.workers.lock_unpoisoned();
            for entry in workers.values_mut() {
                let alive = probe(&entry.follower.url);
                if alive {
                    entry.follower.consecutive_failures = 0;
                    entry.follower.last_seen_ms = crate::time::now_ms();
                    continue;
                }
                entry.follower.consecutive_failures += 1;
                if entry.follower.consecutive_failures >= DEAD_THRESHOLD && !entry.follower.dead {
                    entry.follower.dead = true;
                    if let Some(current) = entry.follower.current_job.take() {
                        requeue.push(current.id);
                    }
                    entry.follower.busy = false;
                    self.bus.publish(Event::FollowerStatus {
                        follower_id: entry.follower.id.clone(),
                        busy: false,
                        dead: true,
                    });
                }
            }
        }

        for job_id in requeue {
            if let Err(err) = self.store.update_job(job_id, &mut |job| {
                job.status = crate::domain::JobStatus::Pending;
                job.progress = 0;
                job.assigned_worker = None;
            }) {
                crate::debug_eprintln!("dispatcher: failed to requeue job {job_id} from dead follower: {err}");
                continue;
            }
            if let Some(job) = self.store.get_job(job_id) {
                self.scheduler.requeue_existing(job_id, job.created_at_ms);
            }
        }
    }

    /// Resync: probes every currently `dead=true` follower and returns it
    /// to the pool if it now responds.
    pub fn resync_dead_followers(&self, probe: impl Fn(&str) -> bool) {
        let mut workers = self.workers.lock_unpoisoned();
        for entry in workers.values_mut() {
            if entry.follower.dead && probe(&entry.follower.url) {
                entry.follower.dead = false;
                entry.follower.consecutive_failures = 0;
                self.bus.publish(Event::FollowerStatus {
                    follower_id: entry.follower.id.clone(),
                    busy: entry.follower.busy,
                    dead: false,
                });
            }
        }
    }

    /// Records a terminal report from a follower, clears its `busy` flag,
    /// and hands the outcome to the Scheduler (which itself drops stale
    /// reports for jobs reassigned away).
    pub fn record_follower_terminal(
        &self,
        follower_id: &FollowerId,
        job_id: JobId,
        outcome: Result<ExecutorOutcome, String>,
    ) {
        {
            let mut workers = self.workers.lock_unpoisoned();
            if let Some(entry) = workers.get_mut(follower_id) {
                entry.follower.busy = false;
                entry.follower.current_job = None;
            }
        }
        if let Err(err) = self.scheduler.report_terminal(job_id, Some(follower_id.as_str()), outcome) {
            crate::debug_eprintln!("dispatcher: failed to report terminal outcome for job {job_id} from follower {follower_id}: {err}");
        }
    }

    pub fn heartbeat_interval() -> Duration {
        HEARTBEAT_INTERVAL
    }

    pub fn follower_snapshot(&self, id: &FollowerId) -> Option<Follower> {
        self.workers.lock_unpoisoned().get(id).map(|e| e.follower.clone())
    }
}
