//! Durable job store contract.
//!
//! Every write is a merge of a [`JobPatch`] over the existing record; callers
//! never replace a record wholesale. Callers bound each call with [`timed`] so
//! a stalled store surfaces as [`StoreError::Unavailable`] instead of hanging
//! the invocation.

pub mod sqlite;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use uuid::Uuid;

use crate::job::{Job, JobPatch, JobStatus, TransitionError};

pub use sqlite::SqliteJobStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("job store error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("corrupt job record {id}: {source}")]
    Corrupt {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Merges `patch` into the record for `job_id`, creating it if absent, and
    /// returns the resulting record.
    async fn upsert(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Jobs currently in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>, StoreError>;

    async fn delete(&self, job_id: Uuid) -> Result<bool, StoreError>;
}

/// Bounds a store call by `limit`.
pub async fn timed<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Unavailable(format!("timed out after {:?}", limit)))?
}
