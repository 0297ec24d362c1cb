//! Coordinator: brings components up in the fixed order
//! `JobStore -> ProgressParser -> Executor -> EventBus -> Scheduler ->
//! Dispatcher -> (followers or local workers) -> transport layer`, and
//! owns graceful shutdown.
//!
//! Grounded on `lib.rs`'s `run()` startup sequencing (building each Tauri
//! plugin/state piece in a fixed order before `.run(...)`) and
//! `app_exit.rs`'s `pause_processing_jobs_for_exit` — wait-with-deadline,
//! poll on a short tick, then give up and force a terminal state for
//! whatever is still running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::dispatcher::StandaloneDispatcher;
use crate::domain::JobStatus;
use crate::error::SchedulerError;
use crate::event_bus::EventBus;
use crate::job_store::JobStore;
use crate::notifications::NotificationSink;
use crate::scheduler::Scheduler;
use crate::time::now_ms;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const SHUTDOWN_POLL_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ShutdownOutcome {
    pub requested_job_count: usize,
    pub completed_job_count: usize,
    pub force_failed_job_count: usize,
}

/// Owns the bring-up order and the shared handles components need. A
/// transport layer (HTTP server, out of scope for this crate) is built on
/// top of this, not inside it.
pub struct Coordinator {
    pub config: Config,
    pub store: Arc<dyn JobStore>,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    accepting_submissions: AtomicBool,
}

impl Coordinator {
    pub fn new(config: Config, store: Arc<dyn JobStore>, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), sinks));
        Coordinator {
            config,
            store,
            bus,
            scheduler,
            accepting_submissions: AtomicBool::new(true),
        }
    }

    pub fn is_accepting_submissions(&self) -> bool {
        self.accepting_submissions.load(Ordering::SeqCst)
    }

    /// Runs graceful shutdown against a standalone dispatcher: stop
    /// accepting submissions, signal the dispatch loop to stop, wait up to
    /// 30 s for in-flight jobs, then force-fail any survivor with
    /// `reason=Shutdown` (see `ExecutorFailure::Shutdown`).
    pub fn shutdown_standalone(&self, dispatcher: &StandaloneDispatcher) -> Result<ShutdownOutcome, SchedulerError> {
        self.shutdown_standalone_with_grace(dispatcher, SHUTDOWN_GRACE)
    }

    /// Same as [`Coordinator::shutdown_standalone`] with an explicit grace
    /// window, so tests don't have to wait out the real 30 s constant.
    pub fn shutdown_standalone_with_grace(
        &self,
        dispatcher: &StandaloneDispatcher,
        grace: Duration,
    ) -> Result<ShutdownOutcome, SchedulerError> {
        self.accepting_submissions.store(false, Ordering::SeqCst);
        dispatcher.shutdown_handle().store(true, Ordering::SeqCst);
        dispatcher.notify_work_available();

        let requested: Vec<u64> = self
            .store
            .list_jobs()
            .into_iter()
            .filter(|j| j.status == JobStatus::Processing)
            .map(|j| j.id)
            .collect();

        let deadline = Instant::now() + grace;
        loop {
            let still_processing = requested
                .iter()
                .filter(|id| {
                    self.store
                        .get_job(**id)
                        .is_some_and(|j| j.status == JobStatus::Processing)
                })
                .count();
            if still_processing == 0 || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(SHUTDOWN_POLL_TICK);
        }

        let mut force_failed = 0;
        for job_id in &requested {
            let now = now_ms();
            let updated = self.store.update_job(*job_id, &mut |job| {
                if job.status == JobStatus::Processing {
                    job.status = JobStatus::Failed;
                    job.error_message = Some("Shutdown".to_string());
                    job.completed_at_ms = Some(now);
                    job.updated_at_ms = now;
                }
            })?;
            if updated.is_some_and(|j| j.error_message.as_deref() == Some("Shutdown")) {
                force_failed += 1;
            }
        }

        Ok(ShutdownOutcome {
            requested_job_count: requested.len(),
            completed_job_count: requested.len() - force_failed,
            force_failed_job_count: force_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument_builder::{AdvancedOptions, AudioCodec, BasicOptions, RateControlMode, SubtitleMode, VideoCodec};
    use crate::job_store::InMemoryJobStore;
    use crate::scheduler::BatchSubmission;

    fn options() -> BasicOptions {
        BasicOptions {
            video_codec: VideoCodec::Libx264,
            rate_control: RateControlMode::Crf,
            rate_value: 20,
            preset: "fast".into(),
            audio_codec: AudioCodec::Copy,
            audio_bitrate_kbps: None,
            subtitle_mode: SubtitleMode::None,
            output_format: "mp4".into(),
        }
    }

    #[test]
    fn shutdown_with_no_in_flight_jobs_completes_immediately() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let coordinator = Coordinator::new(Config::default(), store, vec![]);
        let dispatcher = StandaloneDispatcher::new(coordinator.scheduler.clone());

        let outcome = coordinator.shutdown_standalone(&dispatcher).unwrap();
        assert_eq!(outcome.requested_job_count, 0);
        assert!(!coordinator.is_accepting_submissions());
    }

    #[test]
    fn shutdown_force_fails_a_job_still_processing_past_the_deadline() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let coordinator = Coordinator::new(Config::default(), store.clone(), vec![]);
        coordinator
            .scheduler
            .submit_batch(BatchSubmission {
                name_prefix: "b".into(),
                inputs: vec![crate::argument_builder::ConversionOptions {
                    input_path: "a.mp4".into(),
                    output_dir: "out".into(),
                    basic: options(),
                    advanced: AdvancedOptions::default(),
                    custom_command: None,
                }],
            })
            .unwrap();
        // Nothing ever moves this job out of Processing, simulating an
        // encoder that is still running when shutdown begins.
        coordinator.scheduler.pop_ready(None).unwrap();

        let dispatcher = StandaloneDispatcher::new(coordinator.scheduler.clone());
        let outcome = coordinator
            .shutdown_standalone_with_grace(&dispatcher, Duration::from_millis(50))
            .unwrap();

        assert_eq!(outcome.requested_job_count, 1);
        assert_eq!(outcome.force_failed_job_count, 1);
        let job = store.get_job(1).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Shutdown"));
    }
}
