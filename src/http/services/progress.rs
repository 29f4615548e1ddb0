use actix_web::{get, http::StatusCode, web, Responder};
use uuid::Uuid;

use crate::{
    http::response::{ApiResponse, ErrorStatus, RequestError},
    pipeline::query::{self, QueryError},
    state::AppContext,
};

impl ErrorStatus for QueryError {
    fn status(&self) -> StatusCode {
        match self {
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::NotReady(_) => StatusCode::BAD_REQUEST,
            QueryError::Store(_) | QueryError::Presign(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[get("/progress/{job_id}")]
pub async fn progress(
    ctx: web::Data<AppContext>,
    job_id: web::Path<Uuid>,
) -> Result<impl Responder, RequestError<QueryError>> {
    let job = query::progress(&ctx, job_id.into_inner()).await?;
    Ok(ApiResponse::Ok(job))
}
