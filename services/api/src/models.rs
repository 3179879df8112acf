//! API Models
//!
//! Request and response bodies of the HTTP surface, annotated for `utoipa`.
//! Core assessment types are embedded as opaque JSON objects in the schema.

use chrono::{DateTime, Utc};
use hermes_core::model::{FinalReport, ProficiencyLevel, Question, Skill, StudentAnswer};
use hermes_core::orchestrator::{AssessmentSession, CaptureStream, SessionState};
use hermes_core::store::AssessmentRecord;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Everything a client needs to render a session.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SessionView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub user_id: String,
    #[schema(value_type = Object)]
    pub state: SessionState,
    #[schema(value_type = Option<String>, example = "Vocabulary")]
    pub skill: Option<Skill>,
    #[schema(value_type = String, example = "B1")]
    pub level: ProficiencyLevel,
    pub progress: f64,
    #[schema(value_type = Vec<Object>)]
    pub questions: Vec<Question>,
    #[schema(value_type = Option<Object>)]
    pub report: Option<FinalReport>,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn outcome(state: &SessionState) -> (Option<String>, Option<String>) {
    match state {
        SessionState::ReportReady { warning } => (warning.clone(), None),
        SessionState::Failed { error } => (None, Some(error.clone())),
        _ => (None, None),
    }
}

impl SessionView {
    pub fn new(id: Uuid, created_at: DateTime<Utc>, session: &AssessmentSession) -> Self {
        let (warning, error) = outcome(session.state());
        Self {
            id,
            user_id: session
                .identity()
                .map(|i| i.id.clone())
                .unwrap_or_default(),
            state: session.state().clone(),
            skill: session.current_skill(),
            level: session.level(),
            progress: session.progress(),
            questions: session.questions().to_vec(),
            report: session.report().cloned(),
            warning,
            error,
            created_at,
        }
    }

    /// The last full view with a newer state laid over it, for sessions
    /// busy with a provider call.
    pub fn with_state(mut self, state: SessionState) -> Self {
        let (warning, error) = outcome(&state);
        self.skill = state.skill();
        self.progress = state.progress();
        self.warning = warning;
        self.error = error;
        self.state = state;
        self
    }
}

#[derive(Deserialize, ToSchema)]
pub struct StartSessionPayload {
    #[schema(value_type = String, example = "B1")]
    pub level: ProficiencyLevel,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitSectionPayload {
    #[schema(value_type = Vec<Object>)]
    pub answers: Vec<StudentAnswer>,
}

/// Raw PCM16 little-endian audio of the active listening dialogue.
#[derive(Serialize, ToSchema, Debug)]
pub struct DialogueAudioResponse {
    pub audio_base64: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

#[derive(Deserialize, ToSchema)]
pub struct CapturePayload {
    #[schema(example = "audio/webm;codecs=opus")]
    pub media_type: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct CaptureResponse {
    pub media_type: String,
    pub started_at: DateTime<Utc>,
}

impl From<CaptureStream> for CaptureResponse {
    fn from(stream: CaptureStream) -> Self {
        Self {
            media_type: stream.media_type,
            started_at: stream.started_at,
        }
    }
}

/// A stored assessment of the caller.
#[derive(Serialize, ToSchema, Debug)]
pub struct StoredAssessment {
    pub student_name: String,
    #[schema(value_type = String, example = "B1")]
    pub target_level: ProficiencyLevel,
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub final_report: FinalReport,
}

impl From<AssessmentRecord> for StoredAssessment {
    fn from(record: AssessmentRecord) -> Self {
        Self {
            student_name: record.student_name,
            target_level: record.target_level,
            timestamp: record.timestamp,
            final_report: record.final_report,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
