//! Core of the adaptive language assessment.
//!
//! A session walks a learner through six skill sections in a fixed order.
//! Content, grading and the final report come from structured-output model
//! calls behind the [`llm_client::LLMClient`] seam; listening dialogues are
//! voiced through the [`audio::SpeechSynthesizer`] seam.

pub mod audio;
pub mod config;
pub mod content;
pub mod error;
pub mod gemini;
pub mod llm_client;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod scoring;
pub mod store;
pub mod voices;

pub use config::AssessmentConfig;
pub use error::{AssessmentError, Result};
pub use model::{
    AnswerValue, FinalReport, ProficiencyLevel, Question, SectionResult, Skill, SkillSummary,
    StudentAnswer,
};
pub use orchestrator::{AssessmentServices, AssessmentSession, SessionState};
pub use store::{AssessmentRecord, AssessmentStore, Identity, MemoryStore, ProfileUpsert};
