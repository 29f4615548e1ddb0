//! Object key conventions.
//!
//! - single input: `<kind>/<jobId>.<ext>`
//! - batch input: `<kind>/<jobId>/<index>-<filename>`, committed by
//!   `<kind>/<jobId>/manifest.json`
//! - output: `output/<jobId>.<ext>`

use uuid::Uuid;

use super::NotificationRule;
use crate::conversion::ConversionKind;

pub const OUTPUT_PREFIX: &str = "output";
pub const MANIFEST_NAME: &str = "manifest.json";

pub fn input_key(kind: ConversionKind, job_id: Uuid, ext: &str) -> String {
    format!("{}/{}.{}", kind.prefix(), job_id, ext)
}

pub fn batch_input_key(kind: ConversionKind, job_id: Uuid, index: usize, filename: &str) -> String {
    format!(
        "{}/{}/{:03}-{}",
        kind.prefix(),
        job_id,
        index,
        sanitize_filename(filename)
    )
}

pub fn manifest_key(kind: ConversionKind, job_id: Uuid) -> String {
    format!("{}/{}/{}", kind.prefix(), job_id, MANIFEST_NAME)
}

pub fn output_key(job_id: Uuid, ext: &str) -> String {
    format!("{}/{}.{}", OUTPUT_PREFIX, job_id, ext)
}

/// The events that should start a conversion of `kind`. Batch kinds fire only
/// on the manifest, which is written after every input.
pub fn notification_rule(kind: ConversionKind) -> NotificationRule {
    NotificationRule {
        prefix: format!("{}/", kind.prefix()),
        suffix: kind
            .is_multi_input()
            .then(|| format!("/{}", MANIFEST_NAME)),
    }
}

/// Recovers the conversion kind and job id from an input key.
pub fn parse_trigger(key: &str) -> Option<(ConversionKind, Uuid)> {
    let (prefix, rest) = key.split_once('/')?;
    let kind: ConversionKind = prefix.parse().ok()?;
    let id = match rest.split_once('/') {
        Some((id, _file)) => id,
        None => rest.split_once('.').map_or(rest, |(id, _ext)| id),
    };
    Some((kind, Uuid::parse_str(id).ok()?))
}

/// Reduces a client filename to characters that are safe inside a key.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Rejects keys that could escape the bucket.
pub fn validate(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("empty key");
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err("keys are relative and use '/' separators");
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err("empty path segment");
        }
        if segment == "." || segment == ".." {
            return Err("relative path segment");
        }
    }
    Ok(())
}
