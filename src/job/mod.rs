//! The job record and the state machine that governs every write to it.
//!
//! A job only ever moves `uploading -> processing -> completed | failed`
//! (plus `uploading -> failed` when submission breaks after the record exists).
//! Rewriting the current status is allowed so that duplicate deliveries of the
//! same step are harmless.

pub mod progress;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::conversion::{Conversion, ConversionKind, ConversionParams, ParamError};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        *self == next
            || matches!(
                (self, next),
                (Uploading, Processing)
                    | (Uploading, Failed)
                    | (Processing, Completed)
                    | (Processing, Failed)
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid status transition from {from} to {to}")]
    Invalid { from: JobStatus, to: JobStatus },
    #[error("job is already {0}")]
    Terminal(JobStatus),
    #[error("job record is missing {0}")]
    MissingField(&'static str),
    #[error("conversion type cannot change from {from} to {to}")]
    KindChanged {
        from: ConversionKind,
        to: ConversionKind,
    },
    #[error("inconsistent job record: {0}")]
    Inconsistent(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub conversion_type: ConversionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_files: Option<Vec<String>>,
    #[serde(flatten)]
    pub params: ConversionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_input_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_input_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_output_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Epoch seconds after which the store purges the record.
    pub expires_at: i64,
}

/// A partial update. Every store write is one of these merged over the
/// existing record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub conversion_type: Option<ConversionKind>,
    pub input_file: Option<String>,
    pub input_files: Option<Vec<String>>,
    pub params: Option<ConversionParams>,
    pub s3_input_key: Option<String>,
    pub s3_input_keys: Option<Vec<String>>,
    pub s3_output_key: Option<String>,
    pub original_name: Option<String>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(output_key: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            s3_output_key: Some(output_key.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            progress: Some(0),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: ConversionKind) -> Self {
        self.conversion_type = Some(kind);
        self
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl Job {
    /// Establishes a record from its first write. This is the only place
    /// `createdAt` and `expiresAt` are assigned.
    pub fn create(
        job_id: Uuid,
        patch: JobPatch,
        now: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Result<Self, TransitionError> {
        let conversion_type = patch
            .conversion_type
            .ok_or(TransitionError::MissingField("conversionType"))?;

        let mut job = Job {
            job_id,
            status: JobStatus::Uploading,
            progress: 0,
            conversion_type,
            input_file: None,
            input_files: None,
            params: ConversionParams::default(),
            s3_input_key: None,
            s3_input_keys: None,
            s3_output_key: None,
            original_name: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: now.timestamp() + ttl_secs,
        };
        job.merge_fields(patch, now);
        if let Some(progress) = job.progress_for_status(None) {
            job.progress = progress;
        }
        job.check()?;
        Ok(job)
    }

    /// Merges `patch` over this record, enforcing the state machine. On error
    /// the record is left untouched.
    pub fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match patch.status {
            Some(next) if !self.status.can_transition_to(next) => {
                return Err(TransitionError::Invalid {
                    from: self.status,
                    to: next,
                })
            }
            None if self.status.is_terminal() => {
                return Err(TransitionError::Terminal(self.status))
            }
            _ => {}
        }
        if let Some(kind) = patch.conversion_type {
            if kind != self.conversion_type {
                return Err(TransitionError::KindChanged {
                    from: self.conversion_type,
                    to: kind,
                });
            }
        }

        let mut next = self.clone();
        next.merge_fields(patch, now);
        if let Some(progress) = next.progress_for_status(Some(self.progress)) {
            next.progress = progress;
        }
        if now > next.updated_at {
            next.updated_at = now;
        }
        next.check()?;

        *self = next;
        Ok(())
    }

    fn merge_fields(&mut self, patch: JobPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        merge(&mut self.input_file, patch.input_file);
        merge(&mut self.input_files, patch.input_files);
        if let Some(params) = patch.params {
            merge(&mut self.params.output_format, params.output_format);
            merge(&mut self.params.quality, params.quality);
            merge(&mut self.params.speed, params.speed);
            merge(&mut self.params.bitrate, params.bitrate);
            merge(&mut self.params.pages, params.pages);
        }
        merge(&mut self.s3_input_key, patch.s3_input_key);
        merge(&mut self.s3_input_keys, patch.s3_input_keys);
        merge(&mut self.s3_output_key, patch.s3_output_key);
        merge(&mut self.original_name, patch.original_name);
        merge(&mut self.error, patch.error);
        if self.status == JobStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }

    /// Progress implied by the status: pinned at the terminal values, and
    /// never moving backwards while a conversion is in flight.
    fn progress_for_status(&self, previous: Option<u8>) -> Option<u8> {
        match self.status {
            JobStatus::Completed => Some(100),
            JobStatus::Failed => Some(0),
            JobStatus::Uploading | JobStatus::Processing => {
                previous.map(|prev| prev.max(self.progress))
            }
        }
    }

    fn check(&self) -> Result<(), TransitionError> {
        let has_output = self
            .s3_output_key
            .as_deref()
            .is_some_and(|key| !key.is_empty());
        match self.status {
            JobStatus::Completed if !has_output => {
                Err(TransitionError::Inconsistent("completed job without an output key"))
            }
            JobStatus::Completed => Ok(()),
            _ if self.s3_output_key.is_some() => {
                Err(TransitionError::Inconsistent("output key on a job that is not completed"))
            }
            JobStatus::Failed if self.error.as_deref().map_or(true, str::is_empty) => {
                Err(TransitionError::Inconsistent("failed job without an error"))
            }
            _ => Ok(()),
        }
    }

    pub fn is_expired(&self, now_epoch: i64) -> bool {
        self.expires_at <= now_epoch
    }

    /// Lifts the stored parameters into a typed conversion.
    pub fn conversion(&self) -> Result<Conversion, ParamError> {
        Conversion::from_params(self.conversion_type, &self.params)
    }

    /// Input object keys in submission order.
    pub fn input_keys(&self) -> Vec<String> {
        match (&self.s3_input_keys, &self.s3_input_key) {
            (Some(keys), _) if !keys.is_empty() => keys.clone(),
            (_, Some(key)) => vec![key.clone()],
            _ => Vec::new(),
        }
    }

    /// Human-friendly name for the produced file.
    pub fn download_filename(&self) -> String {
        let base = self.original_name.as_deref().unwrap_or("download");
        let ext = self
            .s3_output_key
            .as_deref()
            .and_then(|key| key.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .unwrap_or("bin");
        format!("{}-{}.{}", base, self.conversion_type.download_suffix(), ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const TTL: i64 = 7 * 24 * 60 * 60;

    fn new_job() -> Job {
        let patch = JobPatch {
            conversion_type: Some(ConversionKind::RemovePdfPages),
            params: Some(ConversionParams {
                pages: Some("2-3".into()),
                ..Default::default()
            }),
            input_file: Some("report.pdf".into()),
            s3_input_key: Some("remove-pdf-pages/x.pdf".into()),
            original_name: Some("report".into()),
            ..Default::default()
        };
        Job::create(Uuid::new_v4(), patch, Utc::now(), TTL).unwrap()
    }

    #[test]
    fn first_write_sets_creation_fields() {
        let job = new_job();
        assert_eq!(job.status, JobStatus::Uploading);
        assert_eq!(job.progress, 0);
        assert_eq!(job.expires_at, job.created_at.timestamp() + TTL);
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn creation_requires_a_conversion_type() {
        let err = Job::create(Uuid::new_v4(), JobPatch::default(), Utc::now(), TTL).unwrap_err();
        assert_eq!(err, TransitionError::MissingField("conversionType"));
    }

    #[test]
    fn partial_updates_keep_existing_fields() {
        let mut job = new_job();
        let created = job.created_at;
        let expires = job.expires_at;
        let later = created + Duration::seconds(5);

        job.apply(JobPatch::status(JobStatus::Processing), later).unwrap();
        job.apply(JobPatch::progress(40), later).unwrap();

        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 40);
        assert_eq!(job.params.pages.as_deref(), Some("2-3"));
        assert_eq!(job.input_file.as_deref(), Some("report.pdf"));
        assert_eq!(job.created_at, created);
        assert_eq!(job.expires_at, expires);
        assert_eq!(job.updated_at, later);
    }

    #[test]
    fn progress_never_moves_backwards_while_processing() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobPatch::status(JobStatus::Processing), now).unwrap();
        job.apply(JobPatch::progress(60), now).unwrap();
        job.apply(JobPatch::progress(30), now).unwrap();
        assert_eq!(job.progress, 60);
    }

    #[test]
    fn completion_pins_progress_and_requires_output_key() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobPatch::status(JobStatus::Processing), now).unwrap();

        let bare = JobPatch::status(JobStatus::Completed);
        assert!(matches!(
            job.apply(bare, now),
            Err(TransitionError::Inconsistent(_))
        ));
        assert_eq!(job.status, JobStatus::Processing);

        job.apply(JobPatch::completed("output/x.pdf"), now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn failure_resets_progress_and_requires_error() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobPatch::status(JobStatus::Processing), now).unwrap();
        job.apply(JobPatch::progress(70), now).unwrap();

        assert!(job.apply(JobPatch::failed(""), now).is_err());

        job.apply(JobPatch::failed("soffice exited with 1"), now).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 0);
        assert!(job.s3_output_key.is_none());
    }

    #[test]
    fn output_key_is_only_valid_on_completed_jobs() {
        let mut job = new_job();
        let patch = JobPatch {
            s3_output_key: Some("output/x.pdf".into()),
            ..Default::default()
        };
        assert!(matches!(
            job.apply(patch, Utc::now()),
            Err(TransitionError::Inconsistent(_))
        ));
    }

    #[test]
    fn terminal_states_are_terminal() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobPatch::status(JobStatus::Processing), now).unwrap();
        job.apply(JobPatch::completed("output/x.pdf"), now).unwrap();

        assert_eq!(
            job.apply(JobPatch::status(JobStatus::Processing), now),
            Err(TransitionError::Invalid {
                from: JobStatus::Completed,
                to: JobStatus::Processing
            })
        );
        assert_eq!(
            job.apply(JobPatch::failed("late failure"), now),
            Err(TransitionError::Invalid {
                from: JobStatus::Completed,
                to: JobStatus::Failed
            })
        );
        assert_eq!(
            job.apply(JobPatch::progress(50), now),
            Err(TransitionError::Terminal(JobStatus::Completed))
        );

        // a duplicate finalisation is accepted and changes nothing observable
        job.apply(JobPatch::completed("output/x.pdf"), now).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn skipping_processing_is_rejected() {
        let mut job = new_job();
        assert_eq!(
            job.apply(JobPatch::completed("output/x.pdf"), Utc::now()),
            Err(TransitionError::Invalid {
                from: JobStatus::Uploading,
                to: JobStatus::Completed
            })
        );
        job.apply(JobPatch::failed("object write failed"), Utc::now())
            .unwrap();
    }

    #[test]
    fn conversion_type_is_immutable() {
        let mut job = new_job();
        let patch = JobPatch::progress(1).with_kind(ConversionKind::Video);
        assert!(matches!(
            job.apply(patch, Utc::now()),
            Err(TransitionError::KindChanged { .. })
        ));
    }

    #[test]
    fn record_serialises_with_wire_names() {
        let mut job = new_job();
        job.apply(JobPatch::status(JobStatus::Processing), Utc::now())
            .unwrap();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "processing");
        assert_eq!(value["conversionType"], "remove-pdf-pages");
        assert_eq!(value["pages"], "2-3");
        assert_eq!(value["s3InputKey"], "remove-pdf-pages/x.pdf");
        assert!(value.get("s3OutputKey").is_none());
        assert!(value["expiresAt"].is_i64());

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn download_filename_uses_original_name_and_suffix() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(JobPatch::status(JobStatus::Processing), now).unwrap();
        job.apply(JobPatch::completed(format!("output/{}.pdf", job.job_id)), now)
            .unwrap();
        assert_eq!(job.download_filename(), "report-edited.pdf");
    }

    #[test]
    fn input_keys_prefer_the_batch_array() {
        let mut job = new_job();
        assert_eq!(job.input_keys(), vec!["remove-pdf-pages/x.pdf".to_string()]);
        job.s3_input_keys = Some(vec!["a".into(), "b".into()]);
        assert_eq!(job.input_keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
