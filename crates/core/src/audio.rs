//! Audio Synthesis Pipeline
//!
//! Turns a listening dialogue into a speech-synthesis request, caches the
//! returned PCM16 audio by dialogue content and decodes it into normalized
//! samples ready for playback.

use crate::error::{AssessmentError, Result};
use crate::model::DialogueLine;
use crate::voices;
use async_trait::async_trait;
use base64::Engine;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// A speaker of a multi-speaker request and the voice it is rendered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerVoice {
    pub speaker_name: String,
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechConfig {
    SingleVoice { voice_name: String },
    MultiSpeaker { speakers: Vec<SpeakerVoice> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub transcript: String,
    pub config: SpeechConfig,
}

/// A text-to-speech backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns base64-encoded PCM16 mono audio, or `None` if the response
    /// carried no audio.
    async fn synthesize(&self, request: SpeechRequest) -> anyhow::Result<Option<String>>;
}

/// Stands in for a speech backend that is not configured.
///
/// Every request fails, which surfaces as a recoverable audio error.
pub struct UnavailableSynthesizer {
    reason: String,
}

impl UnavailableSynthesizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for UnavailableSynthesizer {
    async fn synthesize(&self, _request: SpeechRequest) -> anyhow::Result<Option<String>> {
        Err(anyhow::anyhow!("{}", self.reason))
    }
}

/// Builds the synthesis request for a dialogue.
///
/// The transcript is one `speaker: line` per line, in order. With two or more
/// distinct speakers every mapped speaker gets its own voice; with exactly one
/// the mapped voice (or the default voice) reads everything.
pub fn build_speech_request(
    lines: &[DialogueLine],
    speaker_voice_map: &BTreeMap<String, String>,
) -> Result<SpeechRequest> {
    if lines.is_empty() {
        return Err(AssessmentError::AudioSynthesis(
            "Cannot generate dialogue audio: no speakers found".to_string(),
        ));
    }

    let transcript = lines
        .iter()
        .map(|l| format!("{}: {}", l.speaker, l.line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    let mut speakers: Vec<&str> = Vec::new();
    for line in lines {
        if !speakers.contains(&line.speaker.as_str()) {
            speakers.push(&line.speaker);
        }
    }

    let default_voice = voices::default_voice().name.to_lowercase();
    let config = if speakers.len() > 1 {
        let mut configs = Vec::with_capacity(speakers.len());
        for speaker in speakers {
            match speaker_voice_map.get(speaker) {
                Some(voice) => configs.push(SpeakerVoice {
                    speaker_name: speaker.to_string(),
                    voice_name: voice.to_lowercase(),
                }),
                None => warn!(%speaker, "No voice mapped for dialogue speaker; dropping it from the request"),
            }
        }
        if configs.is_empty() {
            SpeechConfig::SingleVoice {
                voice_name: default_voice,
            }
        } else {
            SpeechConfig::MultiSpeaker { speakers: configs }
        }
    } else {
        let voice_name = speakers
            .first()
            .and_then(|s| speaker_voice_map.get(*s))
            .map(|v| v.to_lowercase())
            .unwrap_or(default_voice);
        SpeechConfig::SingleVoice { voice_name }
    };

    Ok(SpeechRequest { transcript, config })
}

/// Synthesizes dialogue audio, serving repeats from memory.
pub struct DialogueAudioPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl DialogueAudioPipeline {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            synthesizer,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns raw PCM16 little-endian audio for the dialogue.
    ///
    /// Results are keyed by the serialized dialogue lines. The cache lock is
    /// held across the provider call so concurrent requests for the same
    /// dialogue reach the provider once.
    #[instrument(skip_all, fields(lines = lines.len()))]
    pub async fn synthesize_dialogue(
        &self,
        lines: &[DialogueLine],
        speaker_voice_map: &BTreeMap<String, String>,
    ) -> Result<Arc<[u8]>> {
        let key = serde_json::to_string(lines)
            .map_err(|e| AssessmentError::AudioSynthesis(e.to_string()))?;

        let mut cache = self.cache.lock().await;
        if let Some(audio) = cache.get(&key) {
            debug!("Serving dialogue audio from cache");
            return Ok(audio.clone());
        }

        let request = build_speech_request(lines, speaker_voice_map)?;
        let encoded = self
            .synthesizer
            .synthesize(request)
            .await
            .map_err(|e| AssessmentError::AudioSynthesis(format!("TTS API error: {e}")))?
            .filter(|data| !data.is_empty())
            .ok_or_else(|| {
                AssessmentError::AudioSynthesis("No audio data received from TTS model".to_string())
            })?;
        let audio: Arc<[u8]> = decode_base64_audio(&encoded)?.into();

        info!(bytes = audio.len(), "Synthesized dialogue audio");
        cache.insert(key, audio.clone());
        Ok(audio)
    }

    /// Number of dialogues currently cached.
    pub async fn cached_dialogues(&self) -> usize {
        self.cache.lock().await.len()
    }
}

/// Decoded, de-interleaved samples ready to hand to an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub sample_rate: u32,
    /// One vector of samples in [-1.0, 1.0] per channel.
    pub channels: Vec<Vec<f32>>,
}

impl PlaybackBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Decodes PCM16 little-endian audio into per-channel float samples.
///
/// Samples are normalized by dividing by 32768. Interleaved multi-channel
/// input is split frame by frame; a trailing partial frame is dropped.
pub fn decode_to_playback_buffer(
    raw: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackBuffer> {
    if channels == 0 {
        return Err(AssessmentError::AudioSynthesis(
            "Channel count must be at least 1".to_string(),
        ));
    }
    if raw.len() % 2 != 0 {
        return Err(AssessmentError::AudioSynthesis(format!(
            "PCM16 payload has an odd byte length ({})",
            raw.len()
        )));
    }

    let samples = convert_i16_to_f32(&pcm16_from_le_bytes(raw));
    let channel_count = channels as usize;
    let frames = samples.len() / channel_count;
    let channels = if channel_count == 1 {
        vec![samples]
    } else {
        (0..channel_count)
            .map(|c| {
                (0..frames)
                    .map(|frame| samples[frame * channel_count + c])
                    .collect()
            })
            .collect()
    };

    Ok(PlaybackBuffer {
        sample_rate,
        channels,
    })
}

/// Decodes a base64 audio payload into raw bytes.
pub fn decode_base64_audio(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| AssessmentError::AudioSynthesis(format!("Invalid base64 audio: {e}")))
}

/// Encodes raw audio bytes as base64.
pub fn encode_base64_audio(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Interprets little-endian byte pairs as i16 samples.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}
