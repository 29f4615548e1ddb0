//! External conversion collaborators.
//!
//! Given local input path(s) and a typed [`Conversion`], produce a local output
//! file, forwarding whatever progress the underlying tool reports. Media and
//! office conversions shell out; PDF assembly and page surgery run in-process.

pub mod document;
pub mod ffmpeg;
pub mod image;
pub mod pdf;
pub mod process;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;
use tokio::{fs, sync::mpsc};

use crate::conversion::{pages::PageRangeError, Conversion};
use crate::job::progress::ProgressUpdate;

/// Where to find each external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub soffice: String,
    pub heif_convert: String,
    pub pdf2docx: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            soffice: "soffice".to_string(),
            heif_convert: "heif-convert".to_string(),
            pdf2docx: "pdf2docx".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("conversion timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("conversion produced no output")]
    MissingOutput,
    #[error("expected {expected} input file(s), got {got}")]
    InputCount { expected: &'static str, got: usize },
    #[error(transparent)]
    Pages(#[from] PageRangeError),
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("image error: {0}")]
    Image(#[from] ::image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

pub struct Converter {
    pub conversion: Conversion,
    tools: ToolPaths,
    timeout: Duration,
}

impl Converter {
    pub fn new(conversion: Conversion, tools: ToolPaths, timeout: Duration) -> Self {
        Self {
            conversion,
            tools,
            timeout,
        }
    }

    /// Converts `inputs` into `output`. Every error, including an overrun of
    /// the soft timeout, comes back as a [`ConvertError`]; the output is only
    /// accepted if it exists and is non-empty.
    pub async fn convert(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        tx: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<(), ConvertError> {
        info!(
            "converting {} input(s) with {}",
            inputs.len(),
            self.conversion.kind()
        );

        match &self.conversion {
            Conversion::Video {
                output_format,
                speed,
            } => {
                let args = ffmpeg::transcode_args(single(inputs)?, output, *output_format, *speed);
                ffmpeg::run(&self.tools, single(inputs)?, &args, self.timeout, &tx).await?
            }
            Conversion::VideoToMp3 { bitrate } => {
                let args = ffmpeg::extract_audio_args(single(inputs)?, output, *bitrate);
                ffmpeg::run(&self.tools, single(inputs)?, &args, self.timeout, &tx).await?
            }
            Conversion::HeicToJpg { quality } => {
                image::heic_to_jpg(&self.tools, single(inputs)?, output, *quality, self.timeout, &tx)
                    .await?
            }
            Conversion::WordToPdf => {
                document::word_to_pdf(&self.tools, single(inputs)?, output, self.timeout, &tx).await?
            }
            Conversion::PdfToWord => {
                document::pdf_to_word(&self.tools, single(inputs)?, output, self.timeout, &tx).await?
            }
            Conversion::ImageToPdf => {
                if inputs.is_empty() {
                    return Err(ConvertError::InputCount {
                        expected: "at least 1",
                        got: 0,
                    });
                }
                let inputs = inputs.to_vec();
                let output = output.to_path_buf();
                in_process(self.timeout, move || {
                    image::images_to_pdf(&inputs, &output, &tx)
                })
                .await?
            }
            Conversion::ExtractPdfPages { pages } => {
                let (input, output, pages) =
                    (single(inputs)?.to_path_buf(), output.to_path_buf(), pages.clone());
                in_process(self.timeout, move || pdf::extract_pages(&input, &output, &pages))
                    .await?
            }
            Conversion::RemovePdfPages { pages } => {
                let (input, output, pages) =
                    (single(inputs)?.to_path_buf(), output.to_path_buf(), pages.clone());
                in_process(self.timeout, move || pdf::remove_pages(&input, &output, &pages))
                    .await?
            }
        }

        match fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(ConvertError::MissingOutput),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConvertError::MissingOutput),
            Err(e) => Err(e.into()),
        }
    }
}

fn single(inputs: &[PathBuf]) -> Result<&Path, ConvertError> {
    match inputs {
        [input] => Ok(input),
        _ => Err(ConvertError::InputCount {
            expected: "exactly 1",
            got: inputs.len(),
        }),
    }
}

/// Runs CPU-bound work off the async threads, bounded by the soft timeout.
async fn in_process<F>(limit: Duration, work: F) -> Result<(), ConvertError>
where
    F: FnOnce() -> Result<(), ConvertError> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ConvertError::Internal(format!("conversion task failed: {}", e))),
        Err(_) => Err(ConvertError::TimedOut(limit)),
    }
}
