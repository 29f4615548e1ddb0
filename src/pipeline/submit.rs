//! Accept-and-queue: the synchronous half of a conversion.
//!
//! Ordering matters here. The `uploading` record is written and acknowledged
//! before any input object is stored, because storing an input is what
//! triggers the worker and the worker's first act is to read that record.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cleanup::remove_file_quietly;
use crate::{
    config::UploadLimits,
    conversion::{
        format::{check_upload, FormatError},
        Conversion, ParamError,
    },
    job::{JobPatch, JobStatus, TransitionError},
    objects::{keys, ObjectStoreError},
    state::AppContext,
    store::{timed, StoreError},
};

/// One uploaded file, already spooled to local disk.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub conversion: Conversion,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Written after every input of a batch; its creation event is the batch's
/// single trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManifest {
    pub job_id: Uuid,
    pub keys: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("no file uploaded")]
    NoFile,
    #[error("too many files (at most {max})")]
    TooManyFiles { max: usize },
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
    #[error("submission did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Submission {
    /// Checks count, size and type of every file, returning each file's
    /// extension. Runs before any job record exists.
    pub fn validate(&self, limits: &UploadLimits) -> Result<Vec<String>, SubmitError> {
        let kind = self.conversion.kind();
        if self.files.is_empty() {
            return Err(SubmitError::NoFile);
        }
        let max_files = if kind.is_multi_input() {
            limits.max_batch_files
        } else {
            1
        };
        if self.files.len() > max_files {
            return Err(SubmitError::TooManyFiles { max: max_files });
        }

        let limit = limits.for_kind(kind);
        let total: u64 = self.files.iter().map(|f| f.size).sum();
        if total > limit {
            return Err(SubmitError::TooLarge { limit });
        }

        self.files
            .iter()
            .map(|f| {
                check_upload(kind, &f.filename, f.content_type.as_deref()).map_err(SubmitError::from)
            })
            .collect()
    }
}

/// Accepts `submission` and returns as soon as its inputs are stored. The
/// spooled upload files are removed whatever the outcome.
pub async fn submit(ctx: &AppContext, submission: Submission) -> Result<Accepted, SubmitError> {
    let result = accept(ctx, &submission).await;
    for file in &submission.files {
        remove_file_quietly(&file.path).await;
    }
    result
}

async fn accept(ctx: &AppContext, submission: &Submission) -> Result<Accepted, SubmitError> {
    let extensions = submission.validate(&ctx.config.limits)?;
    let conversion = &submission.conversion;
    let kind = conversion.kind();
    let files = &submission.files;
    let job_id = Uuid::new_v4();

    let input_keys: Vec<String> = if kind.is_multi_input() {
        files
            .iter()
            .enumerate()
            .map(|(i, f)| keys::batch_input_key(kind, job_id, i, &f.filename))
            .collect()
    } else {
        vec![keys::input_key(kind, job_id, &extensions[0])]
    };

    let mut patch = JobPatch {
        status: Some(JobStatus::Uploading),
        conversion_type: Some(kind),
        params: Some(conversion.params()),
        original_name: Some(base_name(&files[0].filename)),
        ..Default::default()
    };
    if kind.is_multi_input() {
        patch.input_files = Some(files.iter().map(|f| f.filename.clone()).collect());
        patch.s3_input_keys = Some(input_keys.clone());
    } else {
        patch.input_file = Some(files[0].filename.clone());
        patch.s3_input_key = Some(input_keys[0].clone());
    }

    let store_timeout = ctx.config.store_timeout;
    timed(store_timeout, ctx.jobs.upsert(job_id, patch)).await?;
    info!("[{}] accepted {} with {} file(s)", job_id, kind, files.len());

    let budget = ctx.config.submit_budget;
    let stored = tokio::time::timeout(budget, store_inputs(ctx, job_id, submission, &input_keys))
        .await
        .unwrap_or(Err(SubmitError::TimedOut(budget)));
    if let Err(e) = stored {
        mark_failed(ctx, job_id, &e).await;
        return Err(e);
    }

    match timed(store_timeout, ctx.jobs.upsert(job_id, JobPatch::status(JobStatus::Processing))).await
    {
        Ok(_) => {}
        // the worker can finish before this write lands
        Err(StoreError::Transition(TransitionError::Invalid { from, .. })) if from.is_terminal() => {
            info!("[{}] worker already finished with {}", job_id, from)
        }
        Err(e) => {
            let e = SubmitError::from(e);
            mark_failed(ctx, job_id, &e).await;
            return Err(e);
        }
    }

    Ok(Accepted {
        job_id,
        status: JobStatus::Processing,
    })
}

async fn store_inputs(
    ctx: &AppContext,
    job_id: Uuid,
    submission: &Submission,
    input_keys: &[String],
) -> Result<(), SubmitError> {
    for (file, key) in submission.files.iter().zip(input_keys) {
        ctx.objects.put_file(key, &file.path).await?;
    }

    let kind = submission.conversion.kind();
    if kind.is_multi_input() {
        let manifest = BatchManifest {
            job_id,
            keys: input_keys.to_vec(),
        };
        let bytes = serde_json::to_vec(&manifest)
            .map_err(|e| SubmitError::Io(std::io::Error::other(e)))?;
        ctx.objects
            .put(&keys::manifest_key(kind, job_id), bytes)
            .await?;
    }
    Ok(())
}

async fn mark_failed(ctx: &AppContext, job_id: Uuid, cause: &SubmitError) {
    error!("[{}] submission failed: {}", job_id, cause);
    let patch = JobPatch::failed(format!("submission failed: {}", cause));
    if let Err(e) = timed(ctx.config.store_timeout, ctx.jobs.upsert(job_id, patch)).await {
        error!("[{}] could not record submission failure: {}", job_id, e);
    }
}

/// The client's filename without directories or extension.
fn base_name(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .trim();
    if stem.is_empty() {
        "download".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::ConversionKind;
    use crate::objects::NotificationRule;
    use crate::pipeline::testing::context;

    fn spool(dir: &Path, name: &str, bytes: &[u8], content_type: &str) -> UploadedFile {
        let path = dir.join(format!("upload-{}", Uuid::new_v4()));
        std::fs::write(&path, bytes).unwrap();
        UploadedFile {
            filename: name.to_string(),
            content_type: Some(content_type.to_string()),
            path,
            size: bytes.len() as u64,
        }
    }

    fn pdf_job(pages: &str) -> Conversion {
        let mut params = crate::conversion::ConversionParams::default();
        params.set_field("pages", pages).unwrap();
        Conversion::from_form(ConversionKind::RemovePdfPages, params).unwrap()
    }

    #[test]
    fn size_boundary_is_inclusive() {
        let limits = UploadLimits {
            max_bytes: 100,
            max_document_bytes: 10,
            max_batch_files: 3,
        };
        let file = |size| UploadedFile {
            filename: "a.docx".into(),
            content_type: Some(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into(),
            ),
            path: PathBuf::from("unused"),
            size,
        };
        let at_limit = Submission {
            conversion: Conversion::WordToPdf,
            files: vec![file(10)],
        };
        assert_eq!(at_limit.validate(&limits).unwrap(), vec!["docx".to_string()]);

        let over = Submission {
            conversion: Conversion::WordToPdf,
            files: vec![file(11)],
        };
        assert!(matches!(
            over.validate(&limits),
            Err(SubmitError::TooLarge { limit: 10 })
        ));
    }

    #[test]
    fn single_input_kinds_take_one_file() {
        let limits = UploadLimits::default();
        let file = UploadedFile {
            filename: "a.pdf".into(),
            content_type: Some("application/pdf".into()),
            path: PathBuf::from("unused"),
            size: 1,
        };
        let submission = Submission {
            conversion: Conversion::PdfToWord,
            files: vec![file.clone(), file],
        };
        assert!(matches!(
            submission.validate(&limits),
            Err(SubmitError::TooManyFiles { max: 1 })
        ));
        let empty = Submission {
            conversion: Conversion::PdfToWord,
            files: vec![],
        };
        assert!(matches!(empty.validate(&limits), Err(SubmitError::NoFile)));
    }

    #[tokio::test]
    async fn rejected_uploads_leave_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let file = spool(dir.path(), "notes.txt", b"hello", "text/plain");
        let spooled = file.path.clone();

        let result = submit(
            &ctx,
            Submission {
                conversion: pdf_job("1"),
                files: vec![file],
            },
        )
        .await;
        assert!(matches!(result, Err(SubmitError::Format(_))));
        assert!(!spooled.exists());
        for status in [JobStatus::Uploading, JobStatus::Failed] {
            assert!(ctx.jobs.list_by_status(status, 10).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn record_exists_before_the_triggering_write() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let mut events = ctx.objects.subscribe(vec![NotificationRule {
            prefix: "remove-pdf-pages/".into(),
            suffix: None,
        }]);

        let file = spool(dir.path(), "report.pdf", b"%PDF-1.5", "application/pdf");
        let spooled = file.path.clone();
        let accepted = submit(
            &ctx,
            Submission {
                conversion: pdf_job("2-3"),
                files: vec![file],
            },
        )
        .await
        .unwrap();
        assert_eq!(accepted.status, JobStatus::Processing);
        assert!(!spooled.exists());

        let event = events.recv().await.unwrap();
        assert_eq!(
            event.key,
            format!("remove-pdf-pages/{}.pdf", accepted.job_id)
        );
        let job = ctx.jobs.get(accepted.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.progress < 100);
        assert_eq!(job.s3_input_key.as_deref(), Some(event.key.as_str()));
        assert_eq!(job.params.pages.as_deref(), Some("2-3"));
        assert_eq!(job.original_name.as_deref(), Some("report"));
        assert_eq!(job.input_file.as_deref(), Some("report.pdf"));
    }

    #[tokio::test]
    async fn batches_fire_once_on_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let mut events = ctx
            .objects
            .subscribe(vec![keys::notification_rule(ConversionKind::ImageToPdf)]);

        let files = (0..3)
            .map(|i| spool(dir.path(), &format!("p{}.png", i), b"png", "image/png"))
            .collect();
        let accepted = submit(
            &ctx,
            Submission {
                conversion: Conversion::ImageToPdf,
                files,
            },
        )
        .await
        .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event.key,
            keys::manifest_key(ConversionKind::ImageToPdf, accepted.job_id)
        );
        assert!(events.try_recv().is_err());

        let job = ctx.jobs.get(accepted.job_id).await.unwrap();
        let input_keys = job.s3_input_keys.unwrap();
        assert_eq!(input_keys.len(), 3);
        assert!(input_keys[0].ends_with("/000-p0.png"));
        assert!(input_keys[2].ends_with("/002-p2.png"));
        assert_eq!(job.input_files.unwrap(), ["p0.png", "p1.png", "p2.png"]);
    }

    #[test]
    fn base_names_drop_paths_and_extensions() {
        assert_eq!(base_name("report.final.pdf"), "report.final");
        assert_eq!(base_name("C:\\docs\\cv.docx"), "cv");
        assert_eq!(base_name(".pdf"), ".pdf");
        assert_eq!(base_name("  "), "download");
    }
}
