//! Error taxonomy. Each leaf component returns its own `thiserror`-derived
//! enum rather than a single crate-wide error type.

use thiserror::Error;

use crate::domain::JobId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentBuilderError {
    #[error("path traversal in {field}: {path}")]
    PathTraversal { field: &'static str, path: String },
    #[error("input path is empty")]
    EmptyInput,
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("argv[0] must be the literal executable `ffmpeg`, got {0:?}")]
    DisallowedExecutable(Option<String>),
}

/// Only the two failure modes the Executor cannot fold into
/// `ExecutorOutcome::Failed`: a synchronous validation rejection before
/// spawn, and an I/O failure that left no child process to report on.
/// Timeout, non-zero exit, and cancellation are all ordinary terminal
/// outcomes carried in `Ok(ExecutorOutcome::...)` instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("validator rejected command: {0}")]
    DisallowedExecutable(#[from] ValidationError),
    #[error("failed to spawn encoder process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("failed to prepare output directory: {0}")]
    OutputDirectory(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("job {job} is {status:?}; retry requires failed or cancelled")]
    NotRetryable {
        job: JobId,
        status: crate::domain::JobStatus,
    },
    #[error("output path collides with job {0}'s output")]
    OutputCollision(JobId),
    #[error("batch input list is empty")]
    EmptyBatch,
    #[error(transparent)]
    Builder(#[from] ArgumentBuilderError),
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transactional store operation failed: {0}")]
    Transaction(String),
}

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("no live follower available")]
    NoLiveFollower,
    #[error("follower {0} is unreachable")]
    FollowerUnreachable(crate::domain::FollowerId),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
