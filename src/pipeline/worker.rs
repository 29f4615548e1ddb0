//! The conversion worker: the asynchronous half of a conversion.
//!
//! Invoked once per object-creation event, with nothing but the event to go
//! on. Everything else is recovered from the job record.

use std::path::PathBuf;

use log::{error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::cleanup::Scratch;
use crate::{
    conversion::{Conversion, ConversionKind, ParamError},
    converter::{ConvertError, Converter},
    job::{
        progress::{ProgressBand, ProgressReporter, ProgressUpdate},
        Job, JobPatch, JobStatus, TransitionError,
    },
    notify,
    objects::{keys, ObjectCreated, ObjectStoreError},
    state::AppContext,
    store::{timed, StoreError},
};

/// Tool output kept for the failure report.
const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { output_key: String },
    /// The job was already terminal; the event was a duplicate delivery.
    Skipped(JobStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("event for unknown bucket {0}")]
    ForeignBucket(String),
    #[error("object key {0:?} does not identify a job")]
    UnknownKey(String),
    #[error("job record not found")]
    RecordMissing(Uuid),
    #[error("job record has no input keys")]
    NoInputs,
    #[error("invalid job parameters: {0}")]
    Params(#[from] ParamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker exceeded its {0:?} budget")]
    BudgetExceeded(std::time::Duration),
}

/// Runs the conversion a creation event stands for.
///
/// The whole run is bounded by the worker budget. A failure, including an
/// overrun, is written to the job record as `failed` before it is returned, so
/// the caller only has to decide whether to re-invoke.
pub async fn handle_event(ctx: &AppContext, event: &ObjectCreated) -> Result<Outcome, WorkerError> {
    if event.bucket != ctx.objects.bucket() {
        return Err(WorkerError::ForeignBucket(event.bucket.clone()));
    }
    let (kind, job_id) = keys::parse_trigger(&event.key)
        .ok_or_else(|| WorkerError::UnknownKey(event.key.clone()))?;

    let budget = ctx.config.worker_budget;
    let mut logs = Vec::new();
    // an overrun drops the run (killing its tools and scratch space) and is
    // recorded like any other failure
    let result = tokio::time::timeout(budget, process(ctx, kind, job_id, &mut logs))
        .await
        .unwrap_or(Err(WorkerError::BudgetExceeded(budget)));

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            record_failure(ctx, job_id, kind, &e, logs).await;
            Err(e)
        }
    }
}

async fn process(
    ctx: &AppContext,
    kind: ConversionKind,
    job_id: Uuid,
    logs: &mut Vec<String>,
) -> Result<Outcome, WorkerError> {
    let store_timeout = ctx.config.store_timeout;

    let job = match timed(store_timeout, ctx.jobs.get(job_id)).await {
        Ok(job) => job,
        Err(StoreError::NotFound(_)) => return Err(WorkerError::RecordMissing(job_id)),
        Err(e) => return Err(e.into()),
    };
    if job.status.is_terminal() {
        info!("[{}] already {}, ignoring event", job_id, job.status);
        return Ok(Outcome::Skipped(job.status));
    }
    if job.conversion_type != kind {
        warn!(
            "[{}] event key says {} but the record says {}; following the record",
            job_id, kind, job.conversion_type
        );
    }

    let conversion = job.conversion()?;
    let input_keys = job.input_keys();
    if input_keys.is_empty() {
        return Err(WorkerError::NoInputs);
    }

    match timed(store_timeout, ctx.jobs.upsert(job_id, JobPatch::status(JobStatus::Processing))).await
    {
        Ok(_) => {}
        Err(StoreError::Transition(TransitionError::Invalid { from, .. })) if from.is_terminal() => {
            info!("[{}] finished elsewhere with {}, ignoring event", job_id, from);
            return Ok(Outcome::Skipped(from));
        }
        Err(e) => return Err(e.into()),
    }
    info!(
        "[{}] converting {} input(s) as {}",
        job_id,
        input_keys.len(),
        job.conversion_type
    );

    let reporter = ProgressReporter::spawn(ctx.jobs.clone(), job_id, store_timeout);
    let scratch = Scratch::create(&ctx.config.scratch_dir, "worker", job_id).await?;
    let converted = run_stages(ctx, &job, conversion, &input_keys, &scratch, &reporter, logs).await;
    // drain ticks before the terminal write so none can land after it
    reporter.finish().await;
    scratch.cleanup().await;
    let output_key = converted?;

    match timed(store_timeout, ctx.jobs.upsert(job_id, JobPatch::completed(&output_key))).await {
        Ok(_) => {
            info!("[{}] completed as {}", job_id, output_key);
            Ok(Outcome::Completed { output_key })
        }
        Err(StoreError::Transition(TransitionError::Invalid { from, .. })) if from.is_terminal() => {
            warn!("[{}] finished elsewhere with {} while converting", job_id, from);
            Ok(Outcome::Skipped(from))
        }
        Err(e) => Err(e.into()),
    }
}

/// Download, convert, upload. Returns the output key.
async fn run_stages(
    ctx: &AppContext,
    job: &Job,
    conversion: Conversion,
    input_keys: &[String],
    scratch: &Scratch,
    reporter: &ProgressReporter,
    logs: &mut Vec<String>,
) -> Result<String, WorkerError> {
    let job_id = job.job_id;

    let mut inputs: Vec<PathBuf> = Vec::with_capacity(input_keys.len());
    for (i, key) in input_keys.iter().enumerate() {
        let name = key.rsplit('/').next().unwrap_or("input");
        let path = scratch.input(&format!("{:03}-{}", i, name));
        let size = ctx.objects.download_to(key, &path).await?;
        info!("[{}] downloaded {} ({} bytes)", job_id, key, size);
        reporter.report(ProgressBand::DOWNLOAD.at((i + 1) as f32 / input_keys.len() as f32));
        inputs.push(path);
    }

    let extension = conversion.output_extension();
    let output = scratch.output(&format!("{}.{}", job_id, extension));
    let converter = Converter::new(
        conversion,
        ctx.config.tools.clone(),
        ctx.config.conversion_timeout,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let convert = converter.convert(&inputs, &output, tx);
    tokio::pin!(convert);
    let converted = loop {
        tokio::select! {
            result = &mut convert => break result,
            Some(update) = rx.recv() => on_update(update, reporter, logs),
        }
    };
    while let Ok(update) = rx.try_recv() {
        on_update(update, reporter, logs);
    }
    converted?;
    reporter.report(ProgressBand::UPLOAD.start);

    let output_key = keys::output_key(job_id, extension);
    ctx.objects.put_file(&output_key, &output).await?;
    Ok(output_key)
}

fn on_update(update: ProgressUpdate, reporter: &ProgressReporter, logs: &mut Vec<String>) {
    match update {
        ProgressUpdate::Fraction(fraction) => reporter.report(ProgressBand::CONVERT.at(fraction)),
        ProgressUpdate::Log(line) => {
            if logs.len() == MAX_LOG_LINES {
                logs.remove(0);
            }
            logs.push(line);
        }
    }
}

/// Best-effort write of the `failed` state, followed by the operator webhook.
async fn record_failure(
    ctx: &AppContext,
    job_id: Uuid,
    kind: ConversionKind,
    cause: &WorkerError,
    logs: Vec<String>,
) {
    error!("[{}] conversion failed: {}", job_id, cause);

    let mut patch = JobPatch::failed(cause.to_string());
    if matches!(cause, WorkerError::RecordMissing(_)) {
        // nothing to merge into, so the record is created from the event
        patch = patch.with_kind(kind);
    }
    match timed(ctx.config.store_timeout, ctx.jobs.upsert(job_id, patch)).await {
        Ok(_) => {}
        Err(StoreError::Transition(TransitionError::Invalid { from, .. })) if from.is_terminal() => {
            warn!("[{}] not marking failed, job is already {}", job_id, from);
            return;
        }
        Err(e) => {
            error!("[{}] could not record failure: {}", job_id, e);
            return;
        }
    }

    if let Some(webhook) = ctx.config.webhook.clone() {
        let error = cause.to_string();
        tokio::spawn(async move {
            if let Err(e) = notify::job_failed(&webhook, job_id, kind, &error, &logs.join("\n")).await
            {
                error!("[{}] failed to send failure notification: {}", job_id, e);
            }
        });
    }
}
