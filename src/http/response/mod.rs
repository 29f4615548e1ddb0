use actix_web::{http::StatusCode, HttpResponse, Responder, ResponseError};
use log::{error, warn};
use serde::Serialize;
use uuid::Uuid;

/// A successful response whose body is `T` serialized as-is.
pub enum ApiResponse<T> {
    Ok(T),
    Accepted(T),
}

impl<T: Serialize> Responder for ApiResponse<T> {
    type Body = actix_web::body::BoxBody;
    fn respond_to(self, _req: &actix_web::HttpRequest) -> HttpResponse<Self::Body> {
        match self {
            ApiResponse::Ok(body) => HttpResponse::Ok().json(body),
            ApiResponse::Accepted(body) => HttpResponse::Accepted().json(body),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            request_id: None,
        }
    }
}

/// The status an error maps to on a particular route.
pub trait ErrorStatus {
    fn status(&self) -> StatusCode;
}

/// Wraps a handler error so it renders as `{error}`. Server errors are logged
/// under a fresh request id and the client only sees a generic message plus
/// that id.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct RequestError<E: std::error::Error>(#[from] pub E);

impl<E> ResponseError for RequestError<E>
where
    E: ErrorStatus + std::error::Error,
{
    fn status_code(&self) -> StatusCode {
        self.0.status()
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = if status.is_server_error() {
            let request_id = Uuid::new_v4();
            error!("request {} failed: {}", request_id, self.0);
            ErrorBody {
                error: "internal server error".to_string(),
                request_id: Some(request_id),
            }
        } else {
            warn!("rejected request: {}", self.0);
            ErrorBody::new(self.0.to_string())
        };

        HttpResponse::build(status).json(body)
    }
}
