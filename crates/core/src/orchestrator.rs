//! Session Orchestrator
//!
//! The state machine that walks one learner through every skill section in
//! order, scores each section, synthesizes the final report and persists it.
//!
//! Each provider call is awaited while the session is mutably borrowed, so a
//! session can never have two content-generation calls in flight.

use crate::audio::{DialogueAudioPipeline, PlaybackBuffer, SpeechSynthesizer, decode_to_playback_buffer};
use crate::config::AssessmentConfig;
use crate::content::ContentGenerator;
use crate::error::{AssessmentError, Result};
use crate::model::{FinalReport, ProficiencyLevel, Question, SectionResult, Skill, StudentAnswer};
use crate::report::ReportSynthesizer;
use crate::scoring::ResponseScorer;
use crate::store::{AssessmentRecord, AssessmentStore, Identity, ProfileUpsert};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Every state a session can be in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Initializing,
    AwaitingStart,
    SectionLoading { skill: Skill },
    SectionActive { skill: Skill },
    SectionSubmitting { skill: Skill },
    ReportGenerating,
    /// `warning` carries a persistence failure, if any.
    ReportReady { warning: Option<String> },
    Failed { error: String },
}

impl SessionState {
    pub fn skill(&self) -> Option<Skill> {
        match self {
            SessionState::SectionLoading { skill }
            | SessionState::SectionActive { skill }
            | SessionState::SectionSubmitting { skill } => Some(*skill),
            _ => None,
        }
    }

    /// Percentage of sections reached once this state is entered.
    pub fn progress(&self) -> f64 {
        match self {
            SessionState::SectionLoading { skill }
            | SessionState::SectionActive { skill }
            | SessionState::SectionSubmitting { skill } => {
                (skill.position() + 1) as f64 / Skill::ORDER.len() as f64 * 100.0
            }
            SessionState::ReportGenerating | SessionState::ReportReady { .. } => 100.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::AwaitingStart => write!(f, "awaiting start"),
            SessionState::SectionLoading { skill } => write!(f, "loading the {skill} section"),
            SessionState::SectionActive { skill } => write!(f, "the {skill} section is active"),
            SessionState::SectionSubmitting { skill } => {
                write!(f, "submitting the {skill} section")
            }
            SessionState::ReportGenerating => write!(f, "generating the report"),
            SessionState::ReportReady { .. } => write!(f, "the report is ready"),
            SessionState::Failed { .. } => write!(f, "failed"),
        }
    }
}

/// The providers and collaborators a session drives.
#[derive(Clone)]
pub struct AssessmentServices {
    pub generator: Arc<ContentGenerator>,
    pub scorer: Arc<ResponseScorer>,
    pub reporter: Arc<ReportSynthesizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub store: Arc<dyn AssessmentStore>,
    pub config: AssessmentConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackContext {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureStream {
    pub media_type: String,
    pub started_at: DateTime<Utc>,
}

/// Audio output and input held by a session.
///
/// Playback is shared and acquired idempotently; capture is exclusive.
#[derive(Debug, Default)]
pub struct MediaResources {
    playback: Option<PlaybackContext>,
    capture: Option<CaptureStream>,
}

impl MediaResources {
    pub fn acquire_playback(&mut self, sample_rate: u32, channels: u16) -> PlaybackContext {
        *self.playback.get_or_insert(PlaybackContext {
            sample_rate,
            channels,
        })
    }

    pub fn begin_capture(&mut self, media_type: impl Into<String>) -> Result<CaptureStream> {
        if self.capture.is_some() {
            return Err(AssessmentError::CaptureBusy);
        }
        let stream = CaptureStream {
            media_type: media_type.into(),
            started_at: Utc::now(),
        };
        self.capture = Some(stream.clone());
        Ok(stream)
    }

    pub fn end_capture(&mut self) -> Option<CaptureStream> {
        self.capture.take()
    }

    pub fn release_all(&mut self) {
        if self.playback.take().is_some() {
            debug!("Released playback context");
        }
        if self.capture.take().is_some() {
            debug!("Released capture stream");
        }
    }

    pub fn playback(&self) -> Option<PlaybackContext> {
        self.playback
    }

    pub fn capture(&self) -> Option<&CaptureStream> {
        self.capture.as_ref()
    }
}

/// Synthesized dialogue audio, raw and decoded.
#[derive(Debug, Clone)]
pub struct DialoguePlayback {
    pub pcm: Arc<[u8]>,
    pub buffer: PlaybackBuffer,
    pub context: PlaybackContext,
}

/// One learner's assessment.
pub struct AssessmentSession {
    state: SessionState,
    identity: Option<Identity>,
    level: ProficiencyLevel,
    skill_index: usize,
    questions: Vec<Question>,
    results: Vec<SectionResult>,
    report: Option<FinalReport>,
    services: AssessmentServices,
    audio: DialogueAudioPipeline,
    media: MediaResources,
    state_tx: Option<mpsc::Sender<SessionState>>,
}

impl AssessmentSession {
    pub fn new(services: AssessmentServices) -> Self {
        let audio = DialogueAudioPipeline::new(services.synthesizer.clone());
        Self {
            state: SessionState::Unauthenticated,
            identity: None,
            level: ProficiencyLevel::default(),
            skill_index: 0,
            questions: Vec::new(),
            results: Vec::new(),
            report: None,
            services,
            audio,
            media: MediaResources::default(),
            state_tx: None,
        }
    }

    /// Broadcasts every subsequent state transition on `tx`.
    pub fn with_state_channel(mut self, tx: mpsc::Sender<SessionState>) -> Self {
        self.state_tx = Some(tx);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn level(&self) -> ProficiencyLevel {
        self.level
    }

    /// The skill being loaded, answered or submitted.
    pub fn current_skill(&self) -> Option<Skill> {
        self.state.skill()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn results(&self) -> &[SectionResult] {
        &self.results
    }

    pub fn report(&self) -> Option<&FinalReport> {
        self.report.as_ref()
    }

    pub fn media(&self) -> &MediaResources {
        &self.media
    }

    /// Percentage of sections reached so far.
    pub fn progress(&self) -> f64 {
        self.state.progress()
    }

    async fn transition(&mut self, next: SessionState) {
        info!(from = %self.state, to = %next, "Session state transition");
        self.state = next;
        if let Some(tx) = &self.state_tx {
            if tx.send(self.state.clone()).await.is_err() {
                warn!("Failed to broadcast session state: receiver dropped.");
            }
        }
    }

    async fn fail(&mut self, err: AssessmentError) -> AssessmentError {
        error!(error = %err, "Session failed");
        self.media.release_all();
        self.transition(SessionState::Failed {
            error: err.to_string(),
        })
        .await;
        err
    }

    fn rejected(&self, operation: &'static str) -> AssessmentError {
        AssessmentError::InvalidTransition {
            operation,
            state: self.state.to_string(),
        }
    }

    fn reset(&mut self) {
        self.media.release_all();
        self.audio = DialogueAudioPipeline::new(self.services.synthesizer.clone());
        self.skill_index = 0;
        self.questions.clear();
        self.results.clear();
        self.report = None;
    }

    /// Accepts the identity provider's answer. `None` means unauthenticated.
    pub async fn authenticate(&mut self, identity: Option<Identity>) -> Result<()> {
        if self.state != SessionState::Unauthenticated {
            return Err(self.rejected("authenticate"));
        }
        let Some(identity) = identity else {
            return Err(AssessmentError::Auth(
                "the identity provider reported no signed-in user".to_string(),
            ));
        };
        self.transition(SessionState::Initializing).await;
        info!(user_id = %identity.id, "Session authenticated");
        self.identity = Some(identity);
        self.transition(SessionState::AwaitingStart).await;
        Ok(())
    }

    /// Drops the identity and every accumulated result.
    pub async fn sign_out(&mut self) {
        self.reset();
        self.identity = None;
        self.transition(SessionState::Unauthenticated).await;
    }

    /// Starts a fresh pass at `level`, loading the first section.
    pub async fn start(&mut self, level: ProficiencyLevel) -> Result<()> {
        if self.identity.is_none() {
            let err = AssessmentError::Auth("sign in before starting an assessment".to_string());
            return Err(self.fail(err).await);
        }
        if self.state != SessionState::AwaitingStart {
            return Err(self.rejected("start"));
        }
        info!(%level, "Starting assessment");
        self.reset();
        self.level = level;
        self.load_section().await
    }

    async fn load_section(&mut self) -> Result<()> {
        let skill = Skill::ORDER[self.skill_index];
        self.media.release_all();
        self.questions.clear();
        self.transition(SessionState::SectionLoading { skill }).await;

        match self.services.generator.generate(skill, self.level).await {
            Ok(questions) => {
                self.questions = questions;
                self.transition(SessionState::SectionActive { skill }).await;
                Ok(())
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Scores the active section and moves on to the next one, or to the
    /// report once every skill has a result.
    pub async fn submit_section(&mut self, answers: Vec<StudentAnswer>) -> Result<()> {
        let SessionState::SectionActive { skill } = self.state else {
            return Err(self.rejected("submit_section"));
        };
        self.transition(SessionState::SectionSubmitting { skill }).await;
        self.media.release_all();

        let result = match self
            .services
            .scorer
            .score(skill, self.level, &self.questions, answers)
            .await
        {
            Ok(result) => result,
            Err(err) => return Err(self.fail(err).await),
        };
        self.results.push(result);

        if self.skill_index + 1 < Skill::ORDER.len() {
            self.skill_index += 1;
            self.load_section().await
        } else {
            self.questions.clear();
            self.generate_report().await
        }
    }

    async fn generate_report(&mut self) -> Result<()> {
        self.transition(SessionState::ReportGenerating).await;
        let Some(identity) = self.identity.clone() else {
            let err = AssessmentError::Auth("the session lost its identity".to_string());
            return Err(self.fail(err).await);
        };
        let student_name = identity.display_name();

        let report = match self
            .services
            .reporter
            .synthesize(&student_name, &self.results, self.level)
            .await
        {
            Ok(report) => report,
            Err(err) => return Err(self.fail(err).await),
        };

        let warning = match self.persist(&identity, &student_name, &report).await {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "Assessment results were not saved");
                Some(err.to_string())
            }
        };
        self.report = Some(report);
        self.transition(SessionState::ReportReady { warning }).await;
        Ok(())
    }

    async fn persist(
        &self,
        identity: &Identity,
        student_name: &str,
        report: &FinalReport,
    ) -> Result<()> {
        let now = Utc::now();
        let record = AssessmentRecord {
            identity: identity.clone(),
            student_name: student_name.to_string(),
            timestamp: now,
            target_level: self.level,
            final_report: report.clone(),
        };
        let profile = ProfileUpsert {
            identity: identity.clone(),
            name: student_name.to_string(),
            last_assessment_at: now,
        };

        let saved = self.services.store.save_assessment(record).await;
        let upserted = self.services.store.upsert_profile(profile).await;
        let failures: Vec<String> = [saved, upserted]
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if failures.is_empty() {
            info!(user_id = %identity.id, "Assessment saved");
            Ok(())
        } else {
            Err(AssessmentError::Persistence(failures.join("; ")))
        }
    }

    /// Returns to `AwaitingStart` after a finished or failed pass.
    pub async fn restart(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Failed { .. } | SessionState::ReportReady { .. }
        ) {
            return Err(self.rejected("restart"));
        }
        self.reset();
        let next = if self.identity.is_some() {
            SessionState::AwaitingStart
        } else {
            SessionState::Unauthenticated
        };
        self.transition(next).await;
        Ok(())
    }

    /// Synthesizes the active listening dialogue and decodes it for playback.
    ///
    /// Failures are reported to the caller only; the session state does not
    /// change.
    pub async fn play_dialogue(&mut self) -> Result<DialoguePlayback> {
        if self.state
            != (SessionState::SectionActive {
                skill: Skill::Listening,
            })
        {
            return Err(self.rejected("play_dialogue"));
        }
        let Some(task) = self.questions.iter().find_map(|q| match q {
            Question::ListeningTask(t) => Some(t),
            _ => None,
        }) else {
            return Err(AssessmentError::AudioSynthesis(
                "the listening section has no dialogue".to_string(),
            ));
        };

        let sample_rate = self.services.config.sample_rate;
        let channels = self.services.config.playback_channels;
        let decoded = match self
            .audio
            .synthesize_dialogue(&task.dialogue_lines, &task.speaker_voice_map)
            .await
        {
            Ok(pcm) => decode_to_playback_buffer(&pcm, sample_rate, channels)
                .map(|buffer| (pcm, buffer)),
            Err(err) => Err(err),
        };

        match decoded {
            Ok((pcm, buffer)) => {
                let context = self.media.acquire_playback(sample_rate, channels);
                Ok(DialoguePlayback {
                    pcm,
                    buffer,
                    context,
                })
            }
            Err(err) => {
                warn!(error = %err, "Dialogue playback failed");
                self.media.release_all();
                Err(err)
            }
        }
    }

    /// Opens the exclusive capture stream for a speaking answer.
    pub fn begin_capture(&mut self, media_type: Option<String>) -> Result<CaptureStream> {
        if self.state
            != (SessionState::SectionActive {
                skill: Skill::Speaking,
            })
        {
            return Err(self.rejected("begin_capture"));
        }
        let media_type =
            media_type.unwrap_or_else(|| self.services.config.recording_media_type.clone());
        self.media.begin_capture(media_type)
    }

    pub fn end_capture(&mut self) -> Option<CaptureStream> {
        self.media.end_capture()
    }
}

impl Drop for AssessmentSession {
    fn drop(&mut self) {
        self.media.release_all();
    }
}
