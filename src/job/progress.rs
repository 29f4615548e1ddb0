use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use super::JobPatch;
use crate::store::{timed, JobStore};

/// The slice of 0–100 allotted to one worker stage. Every pipeline reports
/// through the same bands so `progress` means the same thing across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const DOWNLOAD: ProgressBand = ProgressBand { start: 0, end: 25 };
    pub const CONVERT: ProgressBand = ProgressBand { start: 25, end: 90 };
    pub const UPLOAD: ProgressBand = ProgressBand { start: 90, end: 100 };

    /// Maps a stage-local fraction onto the overall scale.
    pub fn at(&self, fraction: f32) -> u8 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f32::from(self.end - self.start);
        self.start + (span * fraction).floor() as u8
    }
}

/// What an external converter reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Fraction of the conversion done, 0.0..=1.0.
    Fraction(f32),
    /// A diagnostic line from the tool, kept for failure reports.
    Log(String),
}

/// Writes progress ticks to the job store off the conversion path.
///
/// Ticks are coalesced and written in order by a single task; a failed write
/// is logged and dropped, never surfaced to the conversion.
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<u8>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(store: Arc<dyn JobStore>, job_id: Uuid, store_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();

        let handle = tokio::spawn(async move {
            let mut written = 0u8;
            while let Some(mut progress) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    progress = progress.max(newer);
                }
                if progress <= written {
                    continue;
                }
                match timed(store_timeout, store.upsert(job_id, JobPatch::progress(progress))).await
                {
                    Ok(_) => {
                        debug!("[{}] progress {}%", job_id, progress);
                        written = progress;
                    }
                    Err(e) => warn!("[{}] progress update to {}% failed: {}", job_id, progress, e),
                }
            }
        });

        Self { tx, handle }
    }

    pub fn report(&self, progress: u8) {
        let _ = self.tx.send(progress);
    }

    /// Flushes queued ticks. Must be awaited before the terminal write so a
    /// late tick can't race it.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!("progress reporter task ended abnormally: {}", e);
        }
    }
}
