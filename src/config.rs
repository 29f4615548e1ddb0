use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context as _;

use crate::conversion::ConversionKind;
use crate::converter::ToolPaths;

const DAY: u64 = 24 * 60 * 60;
const MIB: u64 = 1024 * 1024;

/// Upload caps applied before any job record exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub max_document_bytes: u64,
    pub max_batch_files: usize,
}

impl UploadLimits {
    /// Largest accepted total upload for `kind`, inclusive.
    pub fn for_kind(&self, kind: ConversionKind) -> u64 {
        if kind.is_document() {
            self.max_document_bytes
        } else {
            self.max_bytes
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 100 * MIB,
            max_document_bytes: 10 * MIB,
            max_batch_files: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub pings: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub object_dir: PathBuf,
    pub bucket: String,
    pub scratch_dir: PathBuf,
    pub public_url: String,
    pub signing_secret: String,
    pub job_ttl: Duration,
    pub object_ttl: Duration,
    pub download_url_ttl: Duration,
    pub store_timeout: Duration,
    pub conversion_timeout: Duration,
    pub worker_budget: Duration,
    pub submit_budget: Duration,
    pub limits: UploadLimits,
    pub tools: ToolPaths,
    pub webhook: Option<WebhookConfig>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port_raw = env_string("PORT").unwrap_or_else(|| "24153".to_string());
        if !port_raw.chars().all(char::is_numeric) {
            anyhow::bail!("PORT must be a number");
        }
        let port: u16 = port_raw.parse().context("PORT is out of range")?;

        let defaults = UploadLimits::default();
        let tools = ToolPaths::default();

        Ok(Self {
            port,
            data_dir: env_string("DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            object_dir: env_string("OBJECT_DIR")
                .unwrap_or_else(|| "objects".into())
                .into(),
            bucket: env_string("BUCKET").unwrap_or_else(|| "convertd".into()),
            scratch_dir: env_string("SCRATCH_DIR")
                .unwrap_or_else(|| "scratch".into())
                .into(),
            public_url: env_string("PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            signing_secret: env_string("SIGNING_SECRET")
                .unwrap_or_else(|| hex::encode(rand::random::<[u8; 32]>())),
            job_ttl: env_secs("JOB_TTL_SECS", 7 * DAY)?,
            object_ttl: env_secs("OBJECT_TTL_SECS", 7 * DAY)?,
            download_url_ttl: env_secs("DOWNLOAD_URL_TTL_SECS", 60 * 60)?,
            store_timeout: env_secs("STORE_TIMEOUT_SECS", 3)?,
            conversion_timeout: env_secs("CONVERSION_TIMEOUT_SECS", 240)?,
            worker_budget: env_secs("WORKER_BUDGET_SECS", 15 * 60)?,
            submit_budget: env_secs("SUBMIT_BUDGET_SECS", 30)?,
            limits: UploadLimits {
                max_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_bytes)?,
                max_document_bytes: env_parse(
                    "MAX_DOCUMENT_UPLOAD_BYTES",
                    defaults.max_document_bytes,
                )?,
                max_batch_files: env_parse("MAX_BATCH_FILES", defaults.max_batch_files)?,
            },
            tools: ToolPaths {
                ffmpeg: env_string("FFMPEG").unwrap_or(tools.ffmpeg),
                ffprobe: env_string("FFPROBE").unwrap_or(tools.ffprobe),
                soffice: env_string("SOFFICE").unwrap_or(tools.soffice),
                heif_convert: env_string("HEIF_CONVERT").unwrap_or(tools.heif_convert),
                pdf2docx: env_string("PDF2DOCX").unwrap_or(tools.pdf2docx),
            },
            webhook: env_string("WEBHOOK_URL").map(|url| WebhookConfig {
                url,
                pings: env_string("WEBHOOK_PINGS").unwrap_or_default(),
            }),
        })
    }

    /// Defaults with every directory placed under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            port: 24153,
            data_dir: root.join("data"),
            object_dir: root.join("objects"),
            bucket: "convertd".to_string(),
            scratch_dir: root.join("scratch"),
            public_url: "http://localhost:24153".to_string(),
            signing_secret: hex::encode(rand::random::<[u8; 32]>()),
            job_ttl: Duration::from_secs(7 * DAY),
            object_ttl: Duration::from_secs(7 * DAY),
            download_url_ttl: Duration::from_secs(60 * 60),
            store_timeout: Duration::from_secs(3),
            conversion_timeout: Duration::from_secs(240),
            worker_budget: Duration::from_secs(15 * 60),
            submit_budget: Duration::from_secs(30),
            limits: UploadLimits::default(),
            tools: ToolPaths::default(),
            webhook: None,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}

fn env_secs(name: &str, default: u64) -> anyhow::Result<Duration> {
    env_parse(name, default).map(Duration::from_secs)
}
