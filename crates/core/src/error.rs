//! Assessment error taxonomy.

use crate::model::Skill;

/// Every failure the assessment pipeline can surface.
#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("Malformed {skill} content from provider: {reason}")]
    MalformedResponse { skill: Skill, reason: String },
    #[error("Failed to generate {skill} content: {source}")]
    Generation {
        skill: Skill,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to assess {skill}: {reason}")]
    Scoring { skill: Skill, reason: String },
    #[error("Audio synthesis failed: {0}")]
    AudioSynthesis(String),
    #[error("Failed to generate report: {0}")]
    ReportSynthesis(String),
    #[error("Failed to save results: {0}")]
    Persistence(String),
    #[error("Authentication required: {0}")]
    Auth(String),
    #[error("'{operation}' is not allowed while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: String,
    },
    #[error("An audio capture is already active")]
    CaptureBusy,
}

impl AssessmentError {
    /// Whether the error ends the current session flow.
    ///
    /// Audio and persistence failures are reported but leave the session
    /// where it is. A rejected operation never changes state either.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AssessmentError::MalformedResponse { .. }
                | AssessmentError::Generation { .. }
                | AssessmentError::Scoring { .. }
                | AssessmentError::ReportSynthesis(_)
                | AssessmentError::Auth(_)
        )
    }
}

pub type Result<T, E = AssessmentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_policy() {
        let fatal = [
            AssessmentError::MalformedResponse {
                skill: Skill::Grammar,
                reason: "x".into(),
            },
            AssessmentError::Generation {
                skill: Skill::Reading,
                source: anyhow::anyhow!("timeout"),
            },
            AssessmentError::Scoring {
                skill: Skill::Writing,
                reason: "x".into(),
            },
            AssessmentError::ReportSynthesis("x".into()),
            AssessmentError::Auth("x".into()),
        ];
        assert!(fatal.iter().all(AssessmentError::is_fatal));

        let recoverable = [
            AssessmentError::AudioSynthesis("x".into()),
            AssessmentError::Persistence("x".into()),
            AssessmentError::CaptureBusy,
            AssessmentError::InvalidTransition {
                operation: "submit_section",
                state: "awaiting start".into(),
            },
        ];
        assert!(recoverable.iter().all(|e| !e.is_fatal()));
    }

    #[test]
    fn test_error_display() {
        let err = AssessmentError::MalformedResponse {
            skill: Skill::Listening,
            reason: "missing field `lines`".into(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed Oral Comprehension content from provider: missing field `lines`"
        );
        let err = AssessmentError::Generation {
            skill: Skill::Vocabulary,
            source: anyhow::anyhow!("connection refused"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to generate Vocabulary content: connection refused"
        );
    }
}
