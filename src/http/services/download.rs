// get /download?jobId=<uuid>

use actix_web::{get, http::StatusCode, web, HttpRequest, Responder};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    http::response::{ApiResponse, ErrorStatus, RequestError},
    pipeline::query::{self, QueryError},
    state::AppContext,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadQuery {
    job_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("a valid jobId is required")]
    BadQuery,
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl ErrorStatus for DownloadError {
    fn status(&self) -> StatusCode {
        match self {
            DownloadError::BadQuery
            | DownloadError::Query(QueryError::NotFound(_))
            | DownloadError::Query(QueryError::NotReady(_)) => StatusCode::BAD_REQUEST,
            DownloadError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[get("/download")]
pub async fn download(
    ctx: web::Data<AppContext>,
    req: HttpRequest,
) -> Result<impl Responder, RequestError<DownloadError>> {
    let params: DownloadQuery =
        serde_qs::from_str(req.query_string()).map_err(|_| DownloadError::BadQuery)?;
    let link = query::download(&ctx, params.job_id)
        .await
        .map_err(DownloadError::from)?;
    Ok(ApiResponse::Ok(link))
}
