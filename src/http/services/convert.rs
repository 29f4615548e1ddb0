use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{http::StatusCode, post, web, Responder};
use futures_util::StreamExt as _;
use log::info;
use tokio::{fs, io::AsyncWriteExt as _};
use uuid::Uuid;

use crate::{
    conversion::{Conversion, ConversionKind, ConversionParams, ParamError},
    http::response::{ApiResponse, ErrorStatus, RequestError},
    pipeline::{
        cleanup::remove_file_quietly,
        submit::{submit, Submission, SubmitError, UploadedFile},
    },
    state::AppContext,
};

/// Largest accepted non-file form field.
const MAX_FIELD_BYTES: usize = 4 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unknown conversion type: {0}")]
    UnknownKind(String),
    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("form field {0} is too long")]
    FieldTooLong(String),
    #[error("form field {0} is not valid utf-8")]
    FieldEncoding(String),
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("failed to spool upload: {0}")]
    Spool(#[from] std::io::Error),
}

impl ErrorStatus for SubmitError {
    fn status(&self) -> StatusCode {
        match self {
            SubmitError::NoFile | SubmitError::TooManyFiles { .. } | SubmitError::Params(_) => {
                StatusCode::BAD_REQUEST
            }
            SubmitError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SubmitError::Format(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            SubmitError::Store(_)
            | SubmitError::Objects(_)
            | SubmitError::TimedOut(_)
            | SubmitError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorStatus for UploadError {
    fn status(&self) -> StatusCode {
        match self {
            UploadError::UnknownKind(_)
            | UploadError::Multipart(_)
            | UploadError::FieldTooLong(_)
            | UploadError::FieldEncoding(_)
            | UploadError::Params(_) => StatusCode::BAD_REQUEST,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Submit(e) => e.status(),
            UploadError::Spool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[post("/convert/{kind}")]
pub async fn convert(
    ctx: web::Data<AppContext>,
    kind: web::Path<String>,
    mut payload: Multipart,
) -> Result<impl Responder, RequestError<UploadError>> {
    let kind = kind.into_inner();
    let kind: ConversionKind = kind.parse().map_err(|_| UploadError::UnknownKind(kind))?;

    let mut files = Vec::new();
    let mut params = ConversionParams::default();
    let read = read_form(&ctx, kind, &mut payload, &mut files, &mut params).await;
    let conversion = read.and_then(|()| Ok(Conversion::from_form(kind, params)?));

    let conversion = match conversion {
        Ok(conversion) => conversion,
        Err(e) => {
            for file in &files {
                remove_file_quietly(&file.path).await;
            }
            return Err(e.into());
        }
    };

    let accepted = submit(&ctx, Submission { conversion, files })
        .await
        .map_err(UploadError::from)?;
    Ok(ApiResponse::Accepted(accepted))
}

/// Spools every file part to disk and applies every other part as a
/// conversion parameter. Files land in `files` as soon as they are opened so
/// the caller can clean up after a failure part-way through.
async fn read_form(
    ctx: &AppContext,
    kind: ConversionKind,
    payload: &mut Multipart,
    files: &mut Vec<UploadedFile>,
    params: &mut ConversionParams,
) -> Result<(), UploadError> {
    let limit = ctx.config.limits.for_kind(kind);
    let mut total: u64 = 0;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let Some(disposition) = field.content_disposition() else {
            continue;
        };
        let name = disposition.get_name().unwrap_or_default().to_string();

        if let Some(filename) = disposition.get_filename().map(str::to_string) {
            let content_type = field.content_type().map(|m| m.essence_str().to_string());
            let path = ctx
                .config
                .scratch_dir
                .join(format!("upload-{}", Uuid::new_v4().simple()));
            files.push(UploadedFile {
                filename: filename.clone(),
                content_type,
                path: path.clone(),
                size: 0,
            });

            let mut out = fs::File::create(&path).await?;
            let mut size: u64 = 0;
            while let Some(chunk) = field.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                if total + size > limit {
                    return Err(UploadError::TooLarge { limit });
                }
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            total += size;
            if let Some(file) = files.last_mut() {
                file.size = size;
            }
            info!("spooled {} ({} bytes) for {}", filename, size, kind);
        } else {
            let value = read_text(&mut field, &name).await?;
            params.set_field(&name, &value)?;
        }
    }
    Ok(())
}

async fn read_text(field: &mut Field, name: &str) -> Result<String, UploadError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        bytes.extend_from_slice(&chunk?);
        if bytes.len() > MAX_FIELD_BYTES {
            return Err(UploadError::FieldTooLong(name.to_string()));
        }
    }
    String::from_utf8(bytes).map_err(|_| UploadError::FieldEncoding(name.to_string()))
}
