//! Wire and in-process data model: `Job`, `Batch`, `Follower`, `PickerSnapshot`
//! and the `Event` union fanned out by the [`crate::event_bus::EventBus`].
//!
//! Serde conventions (camelCase wire fields, an
//! explicit rename where the Rust-idiomatic name and the wire name diverge)
//! follow the conventions of a typical `domain.rs` wire-model module.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Monotonic job identifier, minted by [`crate::scheduler::Scheduler`].
pub type JobId = u64;

/// Opaque batch key (a ULID rendered as its canonical string form).
pub type BatchId = String;

/// Opaque follower identifier, assigned at registration time.
pub type FollowerId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A single encoder invocation. `args` is frozen at creation time (§3
/// invariant: "A job's argument vector is immutable after creation").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub args: Vec<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub error_message: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub retried: bool,
    pub cleared: bool,
    pub batch_id: BatchId,
    pub assigned_worker: Option<FollowerId>,
    /// Hash of the `ConversionOptions` this job was built from, used to
    /// detect duplicate submissions and for display/debugging only.
    pub config_fingerprint: u64,
}

impl Job {
    /// Checks the structural invariants tying `status`/`progress`/
    /// `completed_at_ms`/`assigned_worker` together. Intended for tests
    /// and for `JobStore` implementations that want a cheap sanity check
    /// before persisting a mutation.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if (self.progress == 100) != (self.status == JobStatus::Completed) {
            return Err("progress=100 iff status=completed");
        }
        if self.status.is_terminal() != self.completed_at_ms.is_some() {
            return Err("completed_at is set iff status is terminal");
        }
        if (self.status == JobStatus::Processing) != self.assigned_worker.is_some() {
            return Err("assigned_worker is non-null iff status=processing");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Creating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    pub total_files: u32,
    pub created_count: u32,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentJobSnapshot {
    pub id: JobId,
    pub name: String,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follower {
    pub id: FollowerId,
    pub url: String,
    pub busy: bool,
    pub dead: bool,
    pub current_job: Option<CurrentJobSnapshot>,
    pub last_seen_ms: u64,
    /// Consecutive heartbeat failures observed so far; reset to 0 on any
    /// successful probe. Three consecutive failures flips `dead`.
    pub consecutive_failures: u32,
    /// Timestamp used to tiebreak round-robin selection among idle
    /// followers.
    pub last_assigned_ms: u64,
}

/// Resumable file-picker snapshot cache. No behavioural coupling to the
/// scheduling core — it is a standalone lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerSnapshot {
    pub files: Vec<PathBuf>,
    pub config: Option<serde_json::Value>,
    pub expires_at_ms: u64,
}

/// Tagged union of events fanned out by the `EventBus`. Each variant carries
/// only the minimum delta required for consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "job:created")]
    JobCreated { job_id: JobId, batch_id: BatchId },
    #[serde(rename = "job:updated")]
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        error_message: Option<String>,
    },
    #[serde(rename = "batch:progress")]
    BatchProgress {
        batch_id: BatchId,
        created_count: u32,
        total_files: u32,
        status: BatchStatus,
    },
    #[serde(rename = "follower:status")]
    FollowerStatus {
        follower_id: FollowerId,
        busy: bool,
        dead: bool,
    },
}

impl Event {
    /// Topic this event is published under; used by `EventBus::publish` to
    /// route to per-topic subscriber sets.
    pub fn topic(&self) -> &'static str {
        match self {
            Event::JobCreated { .. } => "job",
            Event::JobUpdated { .. } => "job",
            Event::BatchProgress { .. } => "batch",
            Event::FollowerStatus { .. } => "follower",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> Job {
        Job {
            id: 1,
            name: "clip.mp4".into(),
            input_path: "in.mp4".into(),
            output_path: "out.mp4".into(),
            args: vec!["ffmpeg".into()],
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            created_at_ms: 0,
            updated_at_ms: 0,
            completed_at_ms: None,
            retried: false,
            cleared: false,
            batch_id: "b1".into(),
            assigned_worker: None,
            config_fingerprint: 0,
        }
    }

    #[test]
    fn invariants_hold_for_freshly_created_job() {
        base_job().check_invariants().expect("pending job is valid");
    }

    #[test]
    fn progress_100_requires_completed_status() {
        let mut job = base_job();
        job.progress = 100;
        assert!(job.check_invariants().is_err());
        job.status = JobStatus::Completed;
        job.completed_at_ms = Some(1);
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn processing_requires_assigned_worker() {
        let mut job = base_job();
        job.status = JobStatus::Processing;
        assert!(job.check_invariants().is_err());
        job.assigned_worker = Some("f1".into());
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn event_topics_route_job_events_together() {
        let created = Event::JobCreated {
            job_id: 1,
            batch_id: "b1".into(),
        };
        let updated = Event::JobUpdated {
            job_id: 1,
            status: JobStatus::Processing,
            progress: 10,
            error_message: None,
        };
        assert_eq!(created.topic(), updated.topic());
    }

    #[test]
    fn job_updated_event_serializes_with_stable_wire_shape() {
        let event = Event::JobUpdated {
            job_id: 7,
            status: JobStatus::Failed,
            progress: 42,
            error_message: Some("boom".into()),
        };
        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["type"], "job:updated");
        assert_eq!(value["jobId"], 7);
        assert_eq!(value["status"], "failed");
        assert_eq!(value["progress"], 42);
        assert_eq!(value["errorMessage"], "boom");
    }
}
