//! `JobStore`: the persistence seam this crate treats as opaque — no
//! relational-store implementation lives here. The Scheduler only ever talks to
//! this trait; a real deployment backs it with a database, this crate ships
//! only the in-memory reference implementation used by tests and by
//! `InstanceMode::Standalone` when no external store is wired up.
//!
//! Grounded on an `EngineState.jobs: HashMap<String,
//! TranscodeJob>` plus its lock-mutate-notify convention (every mutation
//! happens under `state.lock_unpoisoned()`, then listeners are notified
//! outside the lock) — here expressed as a trait so the mutation site is
//! pluggable instead of a single concrete struct.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{Batch, BatchId, Follower, FollowerId, Job, JobId};
use crate::error::StoreError;
use crate::sync_ext::MutexExt;

pub trait JobStore: Send + Sync {
    fn insert_job(&self, job: Job) -> Result<(), StoreError>;
    fn get_job(&self, id: JobId) -> Option<Job>;
    /// Applies `mutate` to the stored job under a single transaction,
    /// returning the mutated copy. `None` if no such job exists.
    fn update_job(&self, id: JobId, mutate: &mut dyn FnMut(&mut Job)) -> Result<Option<Job>, StoreError>;
    fn list_jobs(&self) -> Vec<Job>;
    fn jobs_in_batch(&self, batch_id: &BatchId) -> Vec<Job>;
    fn remove_job(&self, id: JobId) -> Result<(), StoreError>;

    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError>;
    fn get_batch(&self, id: &BatchId) -> Option<Batch>;
    fn update_batch(&self, id: &BatchId, mutate: &mut dyn FnMut(&mut Batch)) -> Result<Option<Batch>, StoreError>;

    fn upsert_follower(&self, follower: Follower) -> Result<(), StoreError>;
    fn get_follower(&self, id: &FollowerId) -> Option<Follower>;
    fn update_follower(
        &self,
        id: &FollowerId,
        mutate: &mut dyn FnMut(&mut Follower),
    ) -> Result<Option<Follower>, StoreError>;
    fn list_followers(&self) -> Vec<Follower>;
}

/// Reference `JobStore` used by tests and by single-process deployments
/// that do not wire in a real database. A single `Mutex` guards all three
/// maps since the Scheduler never holds it across an `Executor::run` call.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    batches: HashMap<BatchId, Batch>,
    followers: HashMap<FollowerId, Follower>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        InMemoryJobStore::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert_job(&self, job: Job) -> Result<(), StoreError> {
        self.inner.lock_unpoisoned().jobs.insert(job.id, job);
        Ok(())
    }

    fn get_job(&self, id: JobId) -> Option<Job> {
        self.inner.lock_unpoisoned().jobs.get(&id).cloned()
    }

    fn update_job(&self, id: JobId, mutate: &mut dyn FnMut(&mut Job)) -> Result<Option<Job>, StoreError> {
        let mut guard = self.inner.lock_unpoisoned();
        let Some(job) = guard.jobs.get_mut(&id) else {
            return Ok(None);
        };
        mutate(job);
        Ok(Some(job.clone()))
    }

    fn list_jobs(&self) -> Vec<Job> {
        self.inner.lock_unpoisoned().jobs.values().cloned().collect()
    }

    fn jobs_in_batch(&self, batch_id: &BatchId) -> Vec<Job> {
        self.inner
            .lock_unpoisoned()
            .jobs
            .values()
            .filter(|j| &j.batch_id == batch_id)
            .cloned()
            .collect()
    }

    fn remove_job(&self, id: JobId) -> Result<(), StoreError> {
        self.inner.lock_unpoisoned().jobs.remove(&id);
        Ok(())
    }

    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        self.inner.lock_unpoisoned().batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    fn get_batch(&self, id: &BatchId) -> Option<Batch> {
        self.inner.lock_unpoisoned().batches.get(id).cloned()
    }

    fn update_batch(&self, id: &BatchId, mutate: &mut dyn FnMut(&mut Batch)) -> Result<Option<Batch>, StoreError> {
        let mut guard = self.inner.lock_unpoisoned();
        let Some(batch) = guard.batches.get_mut(id) else {
            return Ok(None);
        };
        mutate(batch);
        Ok(Some(batch.clone()))
    }

    fn upsert_follower(&self, follower: Follower) -> Result<(), StoreError> {
        self.inner.lock_unpoisoned().followers.insert(follower.id.clone(), follower);
        Ok(())
    }

    fn get_follower(&self, id: &FollowerId) -> Option<Follower> {
        self.inner.lock_unpoisoned().followers.get(id).cloned()
    }

    fn update_follower(
        &self,
        id: &FollowerId,
        mutate: &mut dyn FnMut(&mut Follower),
    ) -> Result<Option<Follower>, StoreError> {
        let mut guard = self.inner.lock_unpoisoned();
        let Some(follower) = guard.followers.get_mut(id) else {
            return Ok(None);
        };
        mutate(follower);
        Ok(Some(follower.clone()))
    }

    fn list_followers(&self) -> Vec<Follower> {
        self.inner.lock_unpoisoned().followers.values().cloned().collect()
    }
}
