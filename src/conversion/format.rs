use std::collections::HashMap;

use lazy_static::lazy_static;

use super::ConversionKind;

lazy_static! {
    pub static ref VIDEO_FORMATS: HashMap<&'static str, VideoFormat> = {
        let mut map = HashMap::new();
        map.insert("mp4", VideoFormat::MP4);
        map.insert("webm", VideoFormat::WebM);
        map.insert("avi", VideoFormat::AVI);
        map.insert("mkv", VideoFormat::MKV);
        map
    };
}

/// Container formats the video pipeline can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    MP4,
    WebM,
    AVI,
    MKV,
}

impl VideoFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        let ext = s.rsplit('.').next().unwrap_or(s).to_ascii_lowercase();
        VIDEO_FORMATS.get(ext.as_str()).copied()
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            VideoFormat::MP4 => "mp4",
            VideoFormat::WebM => "webm",
            VideoFormat::AVI => "avi",
            VideoFormat::MKV => "mkv",
        }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];
const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

const PDF_EXTENSIONS: &[&str] = &["pdf"];
const PDF_MIME_TYPES: &[&str] = &["application/pdf"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mkv", "mov"];
const VIDEO_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/x-msvideo",
    "video/avi",
    "video/x-matroska",
    "video/quicktime",
];

const HEIC_EXTENSIONS: &[&str] = &["heic", "heif"];
const HEIC_MIME_TYPES: &[&str] = &["image/heic", "image/heif"];

const WORD_EXTENSIONS: &[&str] = &["doc", "docx"];
const WORD_MIME_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Extensions and MIME types a conversion kind accepts. Both must match.
#[derive(Debug, Clone, Copy)]
pub struct AllowList {
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
}

impl ConversionKind {
    pub fn allow_list(&self) -> AllowList {
        let (extensions, mime_types) = match self {
            ConversionKind::ImageToPdf => (IMAGE_EXTENSIONS, IMAGE_MIME_TYPES),
            ConversionKind::PdfToWord
            | ConversionKind::ExtractPdfPages
            | ConversionKind::RemovePdfPages => (PDF_EXTENSIONS, PDF_MIME_TYPES),
            ConversionKind::Video | ConversionKind::VideoToMp3 => {
                (VIDEO_EXTENSIONS, VIDEO_MIME_TYPES)
            }
            ConversionKind::HeicToJpg => (HEIC_EXTENSIONS, HEIC_MIME_TYPES),
            ConversionKind::WordToPdf => (WORD_EXTENSIONS, WORD_MIME_TYPES),
        };
        AllowList {
            extensions,
            mime_types,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("missing file extension")]
    NoExtension,
    #[error("unsupported file extension for {kind}: {ext}")]
    UnsupportedExtension { kind: ConversionKind, ext: String },
    #[error("unsupported content type for {kind}: {mime}")]
    UnsupportedMimeType { kind: ConversionKind, mime: String },
}

/// Lower-cased extension of an uploaded filename, stripped of anything that
/// isn't alphanumeric.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Checks an upload against the allow-list of `kind`, returning its extension.
/// The extension and the declared content type are checked independently; a
/// missing content type counts as a mismatch.
pub fn check_upload(
    kind: ConversionKind,
    filename: &str,
    content_type: Option<&str>,
) -> Result<String, FormatError> {
    let allow = kind.allow_list();

    let ext = extension_of(filename).ok_or(FormatError::NoExtension)?;
    if !allow.extensions.contains(&ext.as_str()) {
        return Err(FormatError::UnsupportedExtension { kind, ext });
    }

    let mime = content_type
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !allow.mime_types.contains(&mime.as_str()) {
        return Err(FormatError::UnsupportedMimeType { kind, mime });
    }

    Ok(ext)
}
