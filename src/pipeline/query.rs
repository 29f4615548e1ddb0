//! Read paths: progress, download links and the operational listing.

use serde::Serialize;
use uuid::Uuid;

use crate::{
    job::{Job, JobStatus},
    objects::ObjectStoreError,
    state::AppContext,
    store::{timed, StoreError},
};

pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    pub download_url: String,
    pub filename: String,
    /// Seconds until `download_url` stops working.
    pub expires_in: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("job not found")]
    NotFound(Uuid),
    #[error("job is {0}, not completed")]
    NotReady(JobStatus),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Presign(#[from] ObjectStoreError),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => QueryError::NotFound(id),
            e => QueryError::Store(e),
        }
    }
}

/// The current record for `job_id`, exactly as stored.
pub async fn progress(ctx: &AppContext, job_id: Uuid) -> Result<Job, QueryError> {
    Ok(timed(ctx.config.store_timeout, ctx.jobs.get(job_id)).await?)
}

/// A time-limited link to a completed job's output. The bytes themselves are
/// never served from here.
pub async fn download(ctx: &AppContext, job_id: Uuid) -> Result<DownloadLink, QueryError> {
    let job = progress(ctx, job_id).await?;
    let output_key = match (job.status, job.s3_output_key.as_deref()) {
        (JobStatus::Completed, Some(key)) => key,
        (status, _) => return Err(QueryError::NotReady(status)),
    };

    let ttl = ctx.config.download_url_ttl;
    let filename = job.download_filename();
    let download_url = ctx.objects.presign(output_key, ttl, &filename)?;
    Ok(DownloadLink {
        download_url,
        filename,
        expires_in: ttl.as_secs(),
    })
}

/// Jobs in `status`, oldest first.
pub async fn list(ctx: &AppContext, status: JobStatus, limit: usize) -> Result<Vec<Job>, QueryError> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    Ok(timed(ctx.config.store_timeout, ctx.jobs.list_by_status(status, limit)).await?)
}
