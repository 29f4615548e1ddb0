use actix_web::{
    get,
    http::{
        header::{ContentDisposition, ContentType},
        StatusCode,
    },
    web, HttpRequest, HttpResponse,
};

use crate::{
    http::response::{ErrorStatus, RequestError},
    objects::{ObjectStoreError, SignedQuery},
    state::AppContext,
};

impl ErrorStatus for ObjectStoreError {
    fn status(&self) -> StatusCode {
        match self {
            ObjectStoreError::NotFound(_) => StatusCode::NOT_FOUND,
            ObjectStoreError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
            ObjectStoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            ObjectStoreError::Sign(_) | ObjectStoreError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Serves an object to whoever holds a valid pre-signed URL for it.
#[get("/objects/{key:.*}")]
pub async fn object(
    ctx: web::Data<AppContext>,
    key: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, RequestError<ObjectStoreError>> {
    let key = key.into_inner();
    let query: SignedQuery = serde_qs::from_str(req.query_string())
        .map_err(|_| ObjectStoreError::Forbidden("missing signature"))?;
    ctx.objects.verify_presigned(&key, &query)?;

    let bytes = ctx.objects.get(&key).await?;
    let mime = mime_guess::from_path(&query.filename).first_or_octet_stream();

    Ok(HttpResponse::Ok()
        .insert_header(ContentType(mime))
        .insert_header(ContentDisposition::attachment(query.filename))
        .body(bytes))
}
