//! Messages delivered by the generative session.
//!
//! The wire shape is JSON with camelCase keys; every top-level field is
//! optional and a single message may carry several of them:
//!
//! ```json
//! { "setupComplete": {} }
//! { "filteredPrompt": { "text": "...", "filteredReason": "..." } }
//! { "serverContent": { "audioChunks": [ { "data": "<base64>", "mimeType": "audio/l16;rate=48000;channels=2" } ] } }
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Sample rate of the PCM the session emits unless the mime type says otherwise.
pub const SEGMENT_SAMPLE_RATE: u32 = 48_000;

/// Channel count of the PCM the session emits unless the mime type says otherwise.
pub const SEGMENT_CHANNELS: u16 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_prompt: Option<FilteredPrompt>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

impl ServerMessage {
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|e| SessionError::Protocol(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::Protocol(e.to_string()))
    }

    pub fn setup_complete() -> Self {
        Self {
            setup_complete: Some(SetupComplete {}),
            ..Default::default()
        }
    }

    pub fn filtered(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            filtered_prompt: Some(FilteredPrompt {
                text: text.into(),
                reason: reason.into(),
            }),
            ..Default::default()
        }
    }

    pub fn audio(chunks: Vec<AudioSegment>) -> Self {
        Self {
            server_content: Some(ServerContent {
                audio_chunks: chunks,
            }),
            ..Default::default()
        }
    }
}

/// Handshake acknowledgement. Carries no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupComplete {}

/// A prompt rejected by the backend's content policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredPrompt {
    pub text: String,
    #[serde(rename = "filteredReason", alias = "reason", default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub audio_chunks: Vec<AudioSegment>,
}

/// One encoded unit of audio: base64 of interleaved little-endian PCM16.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSegment {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// PCM layout parsed from a segment's mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: SEGMENT_SAMPLE_RATE,
            channels: SEGMENT_CHANNELS,
        }
    }
}

impl AudioSegment {
    /// Encode interleaved PCM16 samples.
    pub fn from_pcm16(samples: &[i16], format: PcmFormat) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            data: BASE64.encode(bytes),
            mime_type: Some(format!(
                "audio/l16;rate={};channels={}",
                format.sample_rate, format.channels
            )),
        }
    }

    /// Raw PCM bytes.
    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.data.as_bytes())
    }

    /// Format from `audio/l16;rate=R;channels=C`, falling back to
    /// 48 kHz stereo for anything missing or unparseable.
    pub fn format(&self) -> PcmFormat {
        let mut format = PcmFormat::default();
        let Some(mime) = &self.mime_type else {
            return format;
        };
        for param in mime.split(';').skip(1) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rate" => {
                    if let Ok(rate) = value.trim().parse::<u32>() {
                        if rate > 0 {
                            format.sample_rate = rate;
                        }
                    }
                }
                "channels" => {
                    if let Ok(channels) = value.trim().parse::<u16>() {
                        if channels > 0 {
                            format.channels = channels;
                        }
                    }
                }
                _ => {}
            }
        }
        format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_batched_audio_message() {
        let json = r#"{"serverContent":{"audioChunks":[
            {"data":"AAA=","mimeType":"audio/l16;rate=48000;channels=2"},
            {"data":"AQI="}
        ]}}"#;
        let msg = ServerMessage::from_json(json).unwrap();
        let chunks = msg.server_content.unwrap().audio_chunks;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].mime_type, None);
        assert!(msg.setup_complete.is_none());
    }

    #[test]
    fn parses_setup_and_filtered() {
        let msg = ServerMessage::from_json(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(msg, ServerMessage::setup_complete());

        let msg = ServerMessage::from_json(
            r#"{"filteredPrompt":{"text":"bad","filteredReason":"policy"}}"#,
        )
        .unwrap();
        assert_eq!(msg, ServerMessage::filtered("bad", "policy"));
    }

    #[test]
    fn filtered_accepts_short_reason_key() {
        let msg =
            ServerMessage::from_json(r#"{"filteredPrompt":{"text":"bad","reason":"x"}}"#).unwrap();
        assert_eq!(msg.filtered_prompt.unwrap().reason, "x");
    }

    #[test]
    fn format_from_mime_type() {
        let seg = AudioSegment {
            data: String::new(),
            mime_type: Some("audio/l16; rate=24000; channels=1".to_string()),
        };
        assert_eq!(
            seg.format(),
            PcmFormat {
                sample_rate: 24000,
                channels: 1
            }
        );

        let bare = AudioSegment {
            data: String::new(),
            mime_type: None,
        };
        assert_eq!(bare.format(), PcmFormat::default());
    }

    #[test]
    fn pcm16_payload_is_little_endian() {
        let seg = AudioSegment::from_pcm16(&[1, -2], PcmFormat::default());
        assert_eq!(seg.payload().unwrap(), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = ServerMessage::from_json("{not json").unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }
}
