use std::{path::Path, process::Stdio, time::Duration};

use log::warn;
use tokio::{process::Command, sync::mpsc};

use super::{process::run_tool, ConvertError, ToolPaths};
use crate::conversion::{format::VideoFormat, speed::ConversionSpeed};
use crate::job::progress::ProgressUpdate;

fn codec_args(format: VideoFormat) -> &'static [&'static str] {
    match format {
        VideoFormat::MP4 | VideoFormat::MKV => &[
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
        ],
        VideoFormat::WebM => &["-c:v", "libvpx", "-c:a", "libvorbis"],
        VideoFormat::AVI => &["-c:v", "mpeg4", "-c:a", "libmp3lame"],
    }
}

fn base_args(input: &Path) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
        "-y",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(input.display().to_string()))
    .collect()
}

pub fn transcode_args(
    input: &Path,
    output: &Path,
    format: VideoFormat,
    speed: ConversionSpeed,
) -> Vec<String> {
    let mut args = base_args(input);
    args.extend(codec_args(format).iter().map(|s| s.to_string()));
    args.extend(speed.to_args(&format));
    args.push(output.display().to_string());
    args
}

pub fn extract_audio_args(input: &Path, output: &Path, bitrate: u32) -> Vec<String> {
    let mut args = base_args(input);
    args.extend(
        ["-vn", "-c:a", "libmp3lame", "-b:a"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(format!("{}k", bitrate));
    args.push(output.display().to_string());
    args
}

/// Runs ffmpeg with `args`, turning its `-progress` output into fractions of
/// the input's duration. Without a known duration no fractions are reported.
pub async fn run(
    tools: &ToolPaths,
    input: &Path,
    args: &[String],
    limit: Duration,
    tx: &mpsc::UnboundedSender<ProgressUpdate>,
) -> Result<(), ConvertError> {
    let duration_us = probe_duration(&tools.ffprobe, input)
        .await
        .map(|secs| secs * 1_000_000.0);
    run_tool(&tools.ffmpeg, args, limit, tx, move |line| {
        progress_fraction(line, duration_us)
    })
    .await
}

/// Duration of `input` in seconds, as reported by ffprobe.
pub async fn probe_duration(ffprobe: &str, input: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(
                "ffprobe could not read {}: {}",
                input.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        Err(e) => {
            warn!("failed to run {}: {}", ffprobe, e);
            return None;
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}

/// Parses one line of `-progress` output.
fn progress_fraction(line: &str, duration_us: Option<f64>) -> Option<f32> {
    let (key, value) = line.split_once('=')?;
    match key.trim() {
        "progress" if value.trim() == "end" => Some(1.0),
        "out_time_us" | "out_time_ms" => {
            // ffmpeg reports both keys in microseconds
            let elapsed: f64 = value.trim().parse().ok()?;
            let total = duration_us?;
            Some((elapsed / total).clamp(0.0, 1.0) as f32)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcode_args_pick_codecs_and_speed() {
        let args = transcode_args(
            Path::new("in.mov"),
            Path::new("out.webm"),
            VideoFormat::WebM,
            ConversionSpeed::Fast,
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner"));
        assert!(joined.contains("-i in.mov"));
        assert!(joined.contains("-c:v libvpx -c:a libvorbis"));
        assert!(joined.contains("-speed 3"));
        assert_eq!(args.last().map(String::as_str), Some("out.webm"));

        let args = transcode_args(
            Path::new("in.mov"),
            Path::new("out.mp4"),
            VideoFormat::MP4,
            ConversionSpeed::VerySlow,
        );
        assert!(args.join(" ").contains("-c:v libx264"));
        assert!(args.join(" ").contains("-preset veryslow"));
    }

    #[test]
    fn audio_extraction_drops_video() {
        let args = extract_audio_args(Path::new("in.mp4"), Path::new("out.mp3"), 256);
        let joined = args.join(" ");
        assert!(joined.contains("-vn -c:a libmp3lame -b:a 256k"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp3"));
    }

    #[test]
    fn progress_lines_map_to_fractions() {
        let total = Some(10_000_000.0);
        assert_eq!(progress_fraction("out_time_us=2500000", total), Some(0.25));
        assert_eq!(progress_fraction("out_time_us=N/A", total), None);
        assert_eq!(progress_fraction("out_time_us=20000000", total), Some(1.0));
        assert_eq!(progress_fraction("out_time_us=2500000", None), None);
        assert_eq!(progress_fraction("progress=end", None), Some(1.0));
        assert_eq!(progress_fraction("progress=continue", total), None);
        assert_eq!(progress_fraction("frame=12", total), None);
    }
}
