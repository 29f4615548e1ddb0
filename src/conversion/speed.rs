use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use super::format::VideoFormat;

/// Encoder speed/quality trade-off for the video pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ConversionSpeed {
    UltraFast,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    VerySlow,
}

impl ConversionSpeed {
    pub fn to_args(&self, to: &VideoFormat) -> Vec<String> {
        let mut args = Vec::new();

        match to {
            VideoFormat::MP4 | VideoFormat::MKV => {
                args.push("-preset".to_string());
                args.push(
                    match self {
                        ConversionSpeed::UltraFast => "ultrafast",
                        ConversionSpeed::Fast => "fast",
                        ConversionSpeed::Medium => "medium",
                        ConversionSpeed::Slow => "slow",
                        ConversionSpeed::Slower => "slower",
                        ConversionSpeed::VerySlow => "veryslow",
                    }
                    .to_string(),
                );
            }

            VideoFormat::WebM => {
                args.push("-speed".to_string());
                args.push(
                    match self {
                        ConversionSpeed::UltraFast => "4",
                        ConversionSpeed::Fast => "3",
                        ConversionSpeed::Medium => "2",
                        ConversionSpeed::Slow => "1",
                        ConversionSpeed::Slower => "0",
                        ConversionSpeed::VerySlow => "-1",
                    }
                    .to_string(),
                );
            }

            // mpeg4 has no speed knob
            VideoFormat::AVI => {}
        };

        args
    }
}
