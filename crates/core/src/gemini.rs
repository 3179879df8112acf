//! REST client for the Gemini `generateContent` endpoint.
//!
//! One client serves both seams: structured JSON generation ([`LLMClient`])
//! and prebuilt-voice speech synthesis ([`SpeechSynthesizer`]).

use crate::audio::{SpeechRequest, SpeechSynthesizer};
use crate::llm_client::{LLMClient, StructuredRequest};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use gemini_types::*;
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// --- Local Gemini REST Types (for encapsulation) ---
mod gemini_types {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerateContentRequest {
        pub contents: Vec<Content>,
        pub generation_config: GenerationConfig,
    }
    #[derive(Serialize, Debug)]
    pub(super) struct Content {
        pub parts: Vec<Part>,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum Part {
        Text(String),
        InlineData(Blob),
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }
    #[derive(Serialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_json_schema: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_modalities: Option<Vec<ResponseModality>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum SpeechConfig {
        VoiceConfig(VoiceConfig),
        MultiSpeakerVoiceConfig(MultiSpeakerVoiceConfig),
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct MultiSpeakerVoiceConfig {
        pub speaker_voice_configs: Vec<SpeakerVoiceConfig>,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeakerVoiceConfig {
        pub speaker: String,
        pub voice_config: VoiceConfig,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct GenerateContentResponse {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct Candidate {
        pub content: Option<ResponseContent>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ResponseContent {
        #[serde(default)]
        pub parts: Vec<ResponsePart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ResponsePart {
        pub text: Option<String>,
        pub inline_data: Option<ResponseBlob>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ResponseBlob {
        pub mime_type: Option<String>,
        pub data: String,
    }
}

/// A Gemini client bound to one model.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Points the client at a different API root (a proxy or a local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(
        &self,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        debug!(model = %self.model, "Sending generateContent request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .context("Failed to reach the Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API returned {}: {}", status, detail));
        }
        Ok(response.json().await?)
    }
}

fn build_structured_body(request: StructuredRequest) -> GenerateContentRequest {
    let mut parts = vec![Part::Text(request.instructions)];
    if let Some(audio) = request.audio {
        parts.push(Part::InlineData(Blob {
            mime_type: audio.media_type,
            data: audio.data_base64,
        }));
    }
    GenerateContentRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_json_schema: Some(request.schema),
            ..Default::default()
        },
    }
}

fn prebuilt(voice_name: String) -> VoiceConfig {
    VoiceConfig {
        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name },
    }
}

fn build_speech_body(request: SpeechRequest) -> GenerateContentRequest {
    let speech_config = match request.config {
        crate::audio::SpeechConfig::SingleVoice { voice_name } => {
            gemini_types::SpeechConfig::VoiceConfig(prebuilt(voice_name))
        }
        crate::audio::SpeechConfig::MultiSpeaker { speakers } => {
            gemini_types::SpeechConfig::MultiSpeakerVoiceConfig(MultiSpeakerVoiceConfig {
                speaker_voice_configs: speakers
                    .into_iter()
                    .map(|s| SpeakerVoiceConfig {
                        speaker: s.speaker_name,
                        voice_config: prebuilt(s.voice_name),
                    })
                    .collect(),
            })
        }
    };
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part::Text(request.transcript)],
        }],
        generation_config: GenerationConfig {
            response_modalities: Some(vec![ResponseModality::Audio]),
            speech_config: Some(speech_config),
            ..Default::default()
        },
    }
}

fn first_text(response: &GenerateContentResponse) -> Option<String> {
    let parts = &response.candidates.first()?.content.as_ref()?.parts;
    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    (!text.is_empty()).then_some(text)
}

fn first_audio(response: GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.inline_data)
        .find(|blob| {
            blob.mime_type
                .as_deref()
                .is_none_or(|m| m.starts_with("audio/"))
        })
        .map(|blob| blob.data)
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn generate_structured(&self, request: StructuredRequest) -> Result<String> {
        let response = self
            .generate_content(&build_structured_body(request))
            .await?;
        first_text(&response).context("No text in Gemini response")
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Option<String>> {
        let response = self.generate_content(&build_speech_body(request)).await?;
        Ok(first_audio(response))
    }
}
