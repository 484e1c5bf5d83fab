//! Audio container formats negotiated for capture and playback.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An audio container/codec pair, identified by its mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioFormat {
    #[serde(rename = "audio/webm;codecs=opus")]
    WebmOpus,
    #[serde(rename = "audio/ogg;codecs=opus")]
    OggOpus,
    #[serde(rename = "audio/mp4")]
    Mp4,
    /// Uncompressed PCM in a WAV container. Every backend can produce it.
    #[serde(rename = "audio/wav")]
    Wav,
}

/// Formats probed during negotiation, most preferred first.
pub const PREFERRED_FORMATS: [AudioFormat; 3] =
    [AudioFormat::WebmOpus, AudioFormat::OggOpus, AudioFormat::Mp4];

impl AudioFormat {
    /// Format used when no preferred format is supported.
    pub const FALLBACK: AudioFormat = AudioFormat::Wav;

    /// Returns the mime type for this format.
    pub fn as_mime(self) -> &'static str {
        match self {
            Self::WebmOpus => "audio/webm;codecs=opus",
            Self::OggOpus => "audio/ogg;codecs=opus",
            Self::Mp4 => "audio/mp4",
            Self::Wav => "audio/wav",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// Error returned when parsing an unknown mime type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported audio mime type: {0}")]
pub struct ParseAudioFormatError(pub String);

impl std::str::FromStr for AudioFormat {
    type Err = ParseAudioFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Mime parameters are case-insensitive and may carry spaces after ';'.
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "audio/webm;codecs=opus" => Ok(Self::WebmOpus),
            "audio/ogg;codecs=opus" => Ok(Self::OggOpus),
            "audio/mp4" => Ok(Self::Mp4),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Ok(Self::Wav),
            _ => Err(ParseAudioFormatError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mime_with_whitespace_and_case() {
        assert_eq!(
            "audio/WebM; codecs=opus".parse::<AudioFormat>(),
            Ok(AudioFormat::WebmOpus)
        );
        assert_eq!("audio/x-wav".parse::<AudioFormat>(), Ok(AudioFormat::Wav));
    }

    #[test]
    fn rejects_unknown_mime() {
        let err = "audio/flac".parse::<AudioFormat>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported audio mime type: audio/flac");
    }

    #[test]
    fn fallback_is_not_in_preference_list() {
        assert!(!PREFERRED_FORMATS.contains(&AudioFormat::FALLBACK));
    }

    #[test]
    fn serializes_as_mime() {
        let json = serde_json::to_string(&AudioFormat::OggOpus).unwrap();
        assert_eq!(json, "\"audio/ogg;codecs=opus\"");
    }
}
