use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartAudio,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, InputAudio,
        InputAudioFormat, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Audio sent alongside the instructions (a recorded speaking answer).
#[derive(Debug, Clone, PartialEq)]
pub struct InlineAudio {
    pub media_type: String,
    pub data_base64: String,
}

/// A request for a JSON document conforming to `schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRequest {
    /// Natural-language instructions for the model.
    pub instructions: String,
    /// Short identifier for the schema (`mcq_questions`, `final_report`, ...).
    pub schema_name: String,
    /// A JSON Schema describing the expected response.
    pub schema: serde_json::Value,
    pub audio: Option<InlineAudio>,
}

impl StructuredRequest {
    pub fn new(
        instructions: impl Into<String>,
        schema_name: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            schema_name: schema_name.into(),
            schema,
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: InlineAudio) -> Self {
        self.audio = Some(audio);
        self
    }
}

/// A generic client for a content-generation model that answers with JSON.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Returns the raw response text; callers parse it with [`parse_structured`].
    async fn generate_structured(&self, request: StructuredRequest) -> Result<String>;
}

/// Strips a surrounding Markdown code fence (```json ... ```), if any.
pub fn extract_json_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

/// Parses a provider response into `T`, tolerating a code fence.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json_payload(text))
}

/// Tightens a JSON schema for strict structured outputs: every object
/// rejects unknown keys and lists all of its properties as required.
pub fn strict_schema(mut schema: serde_json::Value) -> serde_json::Value {
    tighten(&mut schema);
    schema
}

fn tighten(node: &mut serde_json::Value) {
    match node {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::Object(properties)) = map.get("properties") {
                let keys: Vec<serde_json::Value> = properties
                    .keys()
                    .map(|k| serde_json::Value::String(k.clone()))
                    .collect();
                map.insert("required".to_string(), serde_json::Value::Array(keys));
                map.insert(
                    "additionalProperties".to_string(),
                    serde_json::Value::Bool(false),
                );
            }
            for value in map.values_mut() {
                tighten(value);
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(tighten),
        _ => {}
    }
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn input_audio_format(media_type: &str) -> Result<InputAudioFormat> {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Ok(InputAudioFormat::Wav),
        "audio/mpeg" | "audio/mp3" => Ok(InputAudioFormat::Mp3),
        _ => Err(anyhow!(
            "Media type '{}' is not supported by the OpenAI-compatible backend",
            media_type
        )),
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn generate_structured(&self, request: StructuredRequest) -> Result<String> {
        let mut parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(request.instructions)
                .build()?,
        )];
        if let Some(audio) = request.audio {
            parts.push(ChatCompletionRequestUserMessageContentPart::InputAudio(
                ChatCompletionRequestMessageContentPartAudio {
                    input_audio: InputAudio {
                        format: input_audio_format(&audio.media_type)?,
                        data: audio.data_base64,
                    },
                },
            ));
        }

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You are an expert English language assessment designer. Respond only with JSON.")
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(parts)
                    .build()?
                    .into(),
            ])
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: request.schema_name,
                    schema: Some(strict_schema(request.schema)),
                    strict: Some(true),
                },
            })
            .build()?;

        let response: CreateChatCompletionResponse =
            self.client.chat().create(chat_request).await?;

        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Reading {
        value: u32,
    }

    #[test]
    fn test_extract_json_payload() {
        assert_eq!(extract_json_payload("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(extract_json_payload("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_payload("```\n[1,2]\n```"), "[1,2]");
        // An unterminated fence is left alone.
        assert_eq!(extract_json_payload("```json {"), "```json {");
    }

    #[test]
    fn test_parse_structured() {
        let parsed: Reading = parse_structured("```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(parsed, Reading { value: 7 });
        assert!(parse_structured::<Reading>("not json").is_err());
        assert!(parse_structured::<Reading>("{\"other\": 1}").is_err());
    }

    #[test]
    fn test_input_audio_format() {
        assert!(matches!(
            input_audio_format("audio/wav"),
            Ok(InputAudioFormat::Wav)
        ));
        assert!(matches!(
            input_audio_format("audio/mpeg; codecs=mp3"),
            Ok(InputAudioFormat::Mp3)
        ));
        assert!(input_audio_format("audio/webm;codecs=opus").is_err());
        assert!(input_audio_format(crate::config::WAV_RECORDING_MEDIA_TYPE).is_ok());
    }

    #[test]
    fn test_strict_schema_closes_every_object() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "score": { "type": "number" },
                "estimatedCefrLevel": { "type": "string" },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "line": { "type": "string" } }
                    }
                }
            },
            "required": ["score"]
        });
        let strict = strict_schema(schema);

        assert_eq!(strict["additionalProperties"], false);
        let required: Vec<&str> = strict["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required.len(), 3);
        assert!(required.contains(&"estimatedCefrLevel"));
        let nested = &strict["properties"]["items"]["items"];
        assert_eq!(nested["additionalProperties"], false);
        assert_eq!(nested["required"], serde_json::json!(["line"]));
        assert!(strict["properties"]["score"].get("additionalProperties").is_none());
    }

    #[test]
    fn test_structured_request_builder() {
        let request = StructuredRequest::new("do it", "sample", serde_json::json!({"type": "object"}))
            .with_audio(InlineAudio {
                media_type: "audio/wav".into(),
                data_base64: "AAAA".into(),
            });
        assert_eq!(request.schema_name, "sample");
        assert_eq!(request.audio.unwrap().data_base64, "AAAA");
    }
}
