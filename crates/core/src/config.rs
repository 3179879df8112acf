use crate::model::Skill;

/// Sample rate of the PCM16 audio returned by the speech provider.
pub const TTS_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Media type recorded speaking answers are declared with by default.
pub const RECORDING_MEDIA_TYPE: &str = "audio/webm;codecs=opus";

/// Recording media type for backends that only take wav or mp3 input audio.
pub const WAV_RECORDING_MEDIA_TYPE: &str = "audio/wav";

/// Tunables for content generation and audio handling.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentConfig {
    pub vocabulary_questions: usize,
    pub grammar_questions: usize,
    /// Multiple-choice sub-questions per reading passage or dialogue.
    pub comprehension_sub_questions: usize,
    pub recording_media_type: String,
    pub sample_rate: u32,
    pub playback_channels: u16,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            vocabulary_questions: 3,
            grammar_questions: 3,
            comprehension_sub_questions: 2,
            recording_media_type: RECORDING_MEDIA_TYPE.to_string(),
            sample_rate: TTS_PCM16_SAMPLE_RATE,
            playback_channels: 1,
        }
    }
}

impl AssessmentConfig {
    /// How many top-level items a skill's section contains.
    pub fn questions_for(&self, skill: Skill) -> usize {
        match skill {
            Skill::Vocabulary => self.vocabulary_questions,
            Skill::Grammar => self.grammar_questions,
            Skill::Reading | Skill::Listening | Skill::Writing | Skill::Speaking => 1,
        }
    }
}
