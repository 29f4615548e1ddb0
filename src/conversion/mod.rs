//! The closed set of conversion pipelines and their typed parameters.
//!
//! A job record stores its parameters as loose optional fields
//! ([`ConversionParams`]) so that it survives schema drift; everything that acts
//! on a job first lifts them into a [`Conversion`], which is validated once at
//! submission and re-checked by the worker.

pub mod format;
pub mod pages;
pub mod speed;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use format::VideoFormat;
use pages::{PageRange, PageRangeError};
use speed::ConversionSpeed;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const DEFAULT_MP3_BITRATE: u32 = 192;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConversionKind {
    ImageToPdf,
    PdfToWord,
    Video,
    VideoToMp3,
    HeicToJpg,
    ExtractPdfPages,
    RemovePdfPages,
    WordToPdf,
}

impl ConversionKind {
    /// Object-store prefix under which this kind's inputs are written.
    pub fn prefix(&self) -> &'static str {
        self.into()
    }

    /// Kinds that take a batch of files rather than exactly one.
    pub fn is_multi_input(&self) -> bool {
        matches!(self, ConversionKind::ImageToPdf)
    }

    /// Kinds that shell out to the heavier office-document converters and so
    /// get the smaller upload cap.
    pub fn is_document(&self) -> bool {
        matches!(self, ConversionKind::PdfToWord | ConversionKind::WordToPdf)
    }

    pub fn download_suffix(&self) -> &'static str {
        match self {
            ConversionKind::ImageToPdf => "merged",
            ConversionKind::VideoToMp3 => "audio",
            ConversionKind::ExtractPdfPages => "extracted",
            ConversionKind::RemovePdfPages => "edited",
            ConversionKind::PdfToWord
            | ConversionKind::Video
            | ConversionKind::HeicToJpg
            | ConversionKind::WordToPdf => "converted",
        }
    }
}

/// Conversion parameters as they appear on the job record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<ConversionSpeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),
    #[error("malformed value for {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("unsupported output format: {0}")]
    OutputFormat(String),
    #[error("quality must be between 1 and 100, got {0}")]
    Quality(u8),
    #[error("bitrate must be between 64 and 320 kbps, got {0}")]
    Bitrate(u32),
    #[error("invalid page range: {0}")]
    Pages(#[from] PageRangeError),
}

impl ConversionParams {
    /// Applies one submitted form field. Unknown fields are ignored.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), ParamError> {
        let value = value.trim();
        match name {
            "outputFormat" | "format" => self.output_format = Some(value.to_ascii_lowercase()),
            "quality" => {
                self.quality = Some(value.parse().map_err(|_| ParamError::Malformed {
                    field: "quality",
                    value: value.to_string(),
                })?)
            }
            "speed" => {
                self.speed = Some(value.parse::<ConversionSpeed>().map_err(|_| {
                    ParamError::Malformed {
                        field: "speed",
                        value: value.to_string(),
                    }
                })?)
            }
            "bitrate" => {
                self.bitrate = Some(value.parse().map_err(|_| ParamError::Malformed {
                    field: "bitrate",
                    value: value.to_string(),
                })?)
            }
            "pages" => self.pages = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }
}

/// One conversion pipeline together with the parameters it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    ImageToPdf,
    PdfToWord,
    Video {
        output_format: VideoFormat,
        speed: ConversionSpeed,
    },
    VideoToMp3 {
        bitrate: u32,
    },
    HeicToJpg {
        quality: u8,
    },
    ExtractPdfPages {
        pages: PageRange,
    },
    RemovePdfPages {
        pages: PageRange,
    },
    WordToPdf,
}

impl Conversion {
    /// Builds a conversion from submitted form fields, filling in defaults for
    /// optional parameters.
    pub fn from_form(kind: ConversionKind, mut params: ConversionParams) -> Result<Self, ParamError> {
        match kind {
            ConversionKind::Video => {
                params.speed.get_or_insert_with(ConversionSpeed::default);
            }
            ConversionKind::VideoToMp3 => {
                params.bitrate.get_or_insert(DEFAULT_MP3_BITRATE);
            }
            ConversionKind::HeicToJpg => {
                params.quality.get_or_insert(DEFAULT_JPEG_QUALITY);
            }
            _ => {}
        }
        Self::from_params(kind, &params)
    }

    /// Builds a conversion from a stored record. Nothing is defaulted here: a
    /// record without its required parameters is a configuration error.
    pub fn from_params(kind: ConversionKind, params: &ConversionParams) -> Result<Self, ParamError> {
        let conversion = match kind {
            ConversionKind::ImageToPdf => Conversion::ImageToPdf,
            ConversionKind::PdfToWord => Conversion::PdfToWord,
            ConversionKind::WordToPdf => Conversion::WordToPdf,
            ConversionKind::Video => {
                let format = params
                    .output_format
                    .as_deref()
                    .ok_or(ParamError::Missing("outputFormat"))?;
                Conversion::Video {
                    output_format: VideoFormat::from_str(format)
                        .ok_or_else(|| ParamError::OutputFormat(format.to_string()))?,
                    speed: params.speed.ok_or(ParamError::Missing("speed"))?,
                }
            }
            ConversionKind::VideoToMp3 => {
                let bitrate = params.bitrate.ok_or(ParamError::Missing("bitrate"))?;
                if !(64..=320).contains(&bitrate) {
                    return Err(ParamError::Bitrate(bitrate));
                }
                Conversion::VideoToMp3 { bitrate }
            }
            ConversionKind::HeicToJpg => {
                let quality = params.quality.ok_or(ParamError::Missing("quality"))?;
                if !(1..=100).contains(&quality) {
                    return Err(ParamError::Quality(quality));
                }
                Conversion::HeicToJpg { quality }
            }
            ConversionKind::ExtractPdfPages => Conversion::ExtractPdfPages {
                pages: params
                    .pages
                    .as_deref()
                    .ok_or(ParamError::Missing("pages"))?
                    .parse()?,
            },
            ConversionKind::RemovePdfPages => Conversion::RemovePdfPages {
                pages: params
                    .pages
                    .as_deref()
                    .ok_or(ParamError::Missing("pages"))?
                    .parse()?,
            },
        };
        Ok(conversion)
    }

    pub fn kind(&self) -> ConversionKind {
        match self {
            Conversion::ImageToPdf => ConversionKind::ImageToPdf,
            Conversion::PdfToWord => ConversionKind::PdfToWord,
            Conversion::Video { .. } => ConversionKind::Video,
            Conversion::VideoToMp3 { .. } => ConversionKind::VideoToMp3,
            Conversion::HeicToJpg { .. } => ConversionKind::HeicToJpg,
            Conversion::ExtractPdfPages { .. } => ConversionKind::ExtractPdfPages,
            Conversion::RemovePdfPages { .. } => ConversionKind::RemovePdfPages,
            Conversion::WordToPdf => ConversionKind::WordToPdf,
        }
    }

    /// The canonical parameters to echo onto the job record.
    pub fn params(&self) -> ConversionParams {
        let mut params = ConversionParams::default();
        match self {
            Conversion::Video {
                output_format,
                speed,
            } => {
                params.output_format = Some(output_format.to_str().to_string());
                params.speed = Some(*speed);
            }
            Conversion::VideoToMp3 { bitrate } => params.bitrate = Some(*bitrate),
            Conversion::HeicToJpg { quality } => params.quality = Some(*quality),
            Conversion::ExtractPdfPages { pages } | Conversion::RemovePdfPages { pages } => {
                params.pages = Some(pages.to_string())
            }
            Conversion::ImageToPdf | Conversion::PdfToWord | Conversion::WordToPdf => {}
        }
        params
    }

    pub fn output_extension(&self) -> &'static str {
        match self {
            Conversion::ImageToPdf
            | Conversion::WordToPdf
            | Conversion::ExtractPdfPages { .. }
            | Conversion::RemovePdfPages { .. } => "pdf",
            Conversion::PdfToWord => "docx",
            Conversion::Video { output_format, .. } => output_format.to_str(),
            Conversion::VideoToMp3 { .. } => "mp3",
            Conversion::HeicToJpg { .. } => "jpg",
        }
    }
}
