use actix_web::{get, http::StatusCode, web, HttpRequest, Responder};
use serde::Deserialize;

use crate::{
    http::response::{ApiResponse, ErrorStatus, RequestError},
    job::JobStatus,
    pipeline::query::{self, QueryError},
    state::AppContext,
};

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct JobsQuery {
    status: JobStatus,
    limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobsError {
    #[error("invalid query: {0}")]
    BadQuery(String),
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl ErrorStatus for JobsError {
    fn status(&self) -> StatusCode {
        match self {
            JobsError::BadQuery(_) => StatusCode::BAD_REQUEST,
            JobsError::Query(e) => e.status(),
        }
    }
}

/// Jobs currently in one status, oldest first. Listing `processing` is how
/// stuck jobs are found.
#[get("/jobs")]
pub async fn jobs(
    ctx: web::Data<AppContext>,
    req: HttpRequest,
) -> Result<impl Responder, RequestError<JobsError>> {
    let params: JobsQuery = serde_qs::from_str(req.query_string())
        .map_err(|e| JobsError::BadQuery(e.to_string()))?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let jobs = query::list(&ctx, params.status, limit)
        .await
        .map_err(JobsError::from)?;
    Ok(ApiResponse::Ok(jobs))
}
