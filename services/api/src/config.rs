use hermes_core::config::{AssessmentConfig, WAV_RECORDING_MEDIA_TYPE};
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// The backend that generates content, grades answers and writes reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub tts_model: String,
    pub log_level: Level,
    pub vocabulary_questions: Option<usize>,
    pub grammar_questions: Option<usize>,
    pub comprehension_sub_questions: Option<usize>,
    /// Minutes a session may sit untouched before it is evicted.
    pub session_idle_minutes: usize,
}

fn optional_count(var: &str) -> Result<Option<usize>, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(count) if count > 0 => Ok(Some(count)),
        _ => Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{}' is not a positive integer", raw),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            _ => Provider::Gemini,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
        let tts_model = std::env::var("TTS_MODEL")
            .unwrap_or_else(|_| "gemini-2.5-flash-preview-tts".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            database_url,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            tts_model,
            log_level,
            vocabulary_questions: optional_count("VOCABULARY_QUESTION_COUNT")?,
            grammar_questions: optional_count("GRAMMAR_QUESTION_COUNT")?,
            comprehension_sub_questions: optional_count("COMPREHENSION_SUBQUESTION_COUNT")?,
            session_idle_minutes: optional_count("SESSION_IDLE_MINUTES")?.unwrap_or(60),
        })
    }

    /// Assessment tunables, with environment overrides applied.
    ///
    /// The OpenAI-compatible backend only grades wav or mp3 recordings, so
    /// clients are asked to record wav when it is selected.
    pub fn assessment_config(&self) -> AssessmentConfig {
        let defaults = AssessmentConfig::default();
        let recording_media_type = match self.provider {
            Provider::OpenAI => WAV_RECORDING_MEDIA_TYPE.to_string(),
            Provider::Gemini => defaults.recording_media_type.clone(),
        };
        AssessmentConfig {
            recording_media_type,
            vocabulary_questions: self
                .vocabulary_questions
                .unwrap_or(defaults.vocabulary_questions),
            grammar_questions: self.grammar_questions.unwrap_or(defaults.grammar_questions),
            comprehension_sub_questions: self
                .comprehension_sub_questions
                .unwrap_or(defaults.comprehension_sub_questions),
            ..defaults
        }
    }
}
