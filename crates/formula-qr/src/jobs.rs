//! Status table for long-running encode/decode jobs.
//!
//! Readers get immutable [`JobSnapshot`]s; each job has exactly one writer, the
//! [`JobHandle`] returned by [`JobStore::create`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::progress::ProgressObserver;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Encode,
    Decode,
    Scan,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// `0..=100`.
    pub progress: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<JobId, Arc<JobSnapshot>>>,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Arc<JobSnapshot>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new job in the `Processing` state.
    pub fn create(self: &Arc<Self>, kind: JobKind) -> JobHandle {
        let id = JobId(Uuid::new_v4());
        self.lock().insert(
            id,
            Arc::new(JobSnapshot {
                id,
                kind,
                status: JobStatus::Processing,
                progress: 0,
                message: String::new(),
                updated_at: Utc::now(),
            }),
        );
        JobHandle {
            store: Arc::clone(self),
            id,
        }
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobSnapshot>> {
        self.lock().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<JobSnapshot>> {
        let mut jobs: Vec<_> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobSnapshot>> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn publish(&self, id: JobId, update: impl FnOnce(&mut JobSnapshot)) {
        let mut jobs = self.lock();
        if let Some(current) = jobs.get_mut(&id) {
            let mut next = JobSnapshot::clone(current);
            update(&mut next);
            next.updated_at = Utc::now();
            *current = Arc::new(next);
        }
    }
}

/// The single writer for one job. Finishing consumes the handle.
#[derive(Debug)]
pub struct JobHandle {
    store: Arc<JobStore>,
    id: JobId,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn update(&self, percent: f32, message: &str) {
        let progress = percent.clamp(0.0, 100.0) as u8;
        self.store.publish(self.id, |job| {
            job.progress = progress;
            job.message = message.to_string();
        });
    }

    pub fn complete(self, message: &str) {
        self.store.publish(self.id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.message = message.to_string();
        });
    }

    pub fn fail(self, message: &str) {
        self.store.publish(self.id, |job| {
            job.status = JobStatus::Failed;
            job.message = message.to_string();
        });
    }
}

impl ProgressObserver for JobHandle {
    fn report(&self, percent: f32, message: &str) {
        self.update(percent, message);
    }
}
