//! Assessment Data Model
//!
//! Skills, proficiency levels, the tagged question union and the records a
//! session accumulates (answers, section results, the final report).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A language skill assessed by exactly one section of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Skill {
    Vocabulary,
    Grammar,
    Reading,
    Listening,
    Writing,
    Speaking,
}

impl Skill {
    /// The fixed global order in which sections are presented.
    pub const ORDER: [Skill; 6] = [
        Skill::Vocabulary,
        Skill::Grammar,
        Skill::Reading,
        Skill::Listening,
        Skill::Writing,
        Skill::Speaking,
    ];

    /// Human-readable label, also used when talking to providers.
    pub fn label(&self) -> &'static str {
        match self {
            Skill::Vocabulary => "Vocabulary",
            Skill::Grammar => "Grammar",
            Skill::Reading => "Reading Comprehension",
            Skill::Listening => "Oral Comprehension",
            Skill::Writing => "Writing",
            Skill::Speaking => "Speaking",
        }
    }

    /// Lowercase, dash-separated form of the label (`reading-comprehension`).
    pub fn slug(&self) -> String {
        self.label()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Writing and Speaking are graded by the provider rather than by rule.
    pub fn is_free_form(&self) -> bool {
        matches!(self, Skill::Writing | Skill::Speaking)
    }

    /// Reading and Listening grade their tasks' sub-questions.
    pub fn is_comprehension(&self) -> bool {
        matches!(self, Skill::Reading | Skill::Listening)
    }

    /// Position of the skill in [`Skill::ORDER`].
    pub fn position(&self) -> usize {
        Skill::ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Skill {
    type Err = String;

    /// Accepts either the label ("Oral Comprehension") or the variant name
    /// ("Listening"), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Skill::ORDER
            .into_iter()
            .find(|skill| {
                skill.label().eq_ignore_ascii_case(wanted)
                    || format!("{:?}", skill).eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("Unknown skill: '{}'", s))
    }
}

/// A CEFR-style proficiency tier, totally ordered from A1 to C2.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ProficiencyLevel {
    A1,
    A2,
    #[default]
    B1,
    B2,
    C1,
    C2,
}

impl ProficiencyLevel {
    pub const ALL: [ProficiencyLevel; 6] = [
        ProficiencyLevel::A1,
        ProficiencyLevel::A2,
        ProficiencyLevel::B1,
        ProficiencyLevel::B2,
        ProficiencyLevel::C1,
        ProficiencyLevel::C2,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ProficiencyLevel::A1 => "A1",
            ProficiencyLevel::A2 => "A2",
            ProficiencyLevel::B1 => "B1",
            ProficiencyLevel::B2 => "B2",
            ProficiencyLevel::C1 => "C1",
            ProficiencyLevel::C2 => "C2",
        }
    }

    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Finds the first level code in `text`, scanning left to right.
    ///
    /// "Upper B1 (close to B2)" yields `B1`. Matching is case-insensitive and
    /// purely textual; it is a heuristic over provider prose, not a parser.
    pub fn extract_from_text(text: &str) -> Option<ProficiencyLevel> {
        let upper = text.to_uppercase();
        ProficiencyLevel::ALL
            .into_iter()
            .filter_map(|level| upper.find(level.code()).map(|pos| (pos, level)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, level)| level)
    }
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ProficiencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ProficiencyLevel::ALL
            .into_iter()
            .find(|level| level.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Unknown proficiency level: '{}'", s))
    }
}

/// Builds the deterministic identity of a question or sub-question.
pub fn question_id(
    skill: Skill,
    level: ProficiencyLevel,
    index: usize,
    sub_index: Option<usize>,
) -> String {
    match sub_index {
        Some(sub) => format!("{}-{}-{}-{}", skill.slug(), level, index, sub),
        None => format!("{}-{}-{}", skill.slug(), level, index),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleChoiceQuestion {
    pub id: String,
    pub skill: Skill,
    pub level: ProficiencyLevel,
    pub prompt_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillBlankQuestion {
    pub id: String,
    pub skill: Skill,
    pub level: ProficiencyLevel,
    pub prompt_text: String,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingTask {
    pub id: String,
    pub level: ProficiencyLevel,
    pub prompt_text: String,
    pub passage: String,
    pub sub_questions: Vec<MultipleChoiceQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogueLine {
    pub speaker: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningTask {
    pub id: String,
    pub level: ProficiencyLevel,
    pub prompt_text: String,
    pub dialogue_title: Option<String>,
    pub dialogue_lines: Vec<DialogueLine>,
    /// Dialogue speaker name → voice profile name.
    pub speaker_voice_map: std::collections::BTreeMap<String, String>,
    pub sub_questions: Vec<MultipleChoiceQuestion>,
}

/// A single open prompt answered with free text (Writing) or audio (Speaking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeFormTask {
    pub id: String,
    pub level: ProficiencyLevel,
    pub prompt_text: String,
    pub task_description: Option<String>,
}

/// Every shape of item a section can present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Question {
    MultipleChoice(MultipleChoiceQuestion),
    FillBlank(FillBlankQuestion),
    ReadingTask(ReadingTask),
    ListeningTask(ListeningTask),
    WritingTask(FreeFormTask),
    SpeakingTask(FreeFormTask),
}

impl Question {
    pub fn id(&self) -> &str {
        match self {
            Question::MultipleChoice(q) => &q.id,
            Question::FillBlank(q) => &q.id,
            Question::ReadingTask(t) => &t.id,
            Question::ListeningTask(t) => &t.id,
            Question::WritingTask(t) | Question::SpeakingTask(t) => &t.id,
        }
    }

    pub fn skill(&self) -> Skill {
        match self {
            Question::MultipleChoice(q) => q.skill,
            Question::FillBlank(q) => q.skill,
            Question::ReadingTask(_) => Skill::Reading,
            Question::ListeningTask(_) => Skill::Listening,
            Question::WritingTask(_) => Skill::Writing,
            Question::SpeakingTask(_) => Skill::Speaking,
        }
    }

    pub fn level(&self) -> ProficiencyLevel {
        match self {
            Question::MultipleChoice(q) => q.level,
            Question::FillBlank(q) => q.level,
            Question::ReadingTask(t) => t.level,
            Question::ListeningTask(t) => t.level,
            Question::WritingTask(t) | Question::SpeakingTask(t) => t.level,
        }
    }

    pub fn prompt_text(&self) -> &str {
        match self {
            Question::MultipleChoice(q) => &q.prompt_text,
            Question::FillBlank(q) => &q.prompt_text,
            Question::ReadingTask(t) => &t.prompt_text,
            Question::ListeningTask(t) => &t.prompt_text,
            Question::WritingTask(t) | Question::SpeakingTask(t) => &t.prompt_text,
        }
    }
}

/// The raw value a learner submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerValue {
    Text {
        value: String,
    },
    /// Base64-encoded recording with its declared media type.
    Audio {
        data: String,
        media_type: Option<String>,
    },
}

impl AnswerValue {
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text { value } => value.trim().is_empty(),
            AnswerValue::Audio { data, .. } => data.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text { value } => Some(value),
            AnswerValue::Audio { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub question_id: String,
    pub answer: AnswerValue,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl StudentAnswer {
    pub fn text(question_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            answer: AnswerValue::Text {
                value: value.into(),
            },
            is_correct: None,
            feedback: None,
            score: None,
        }
    }

    pub fn audio(question_id: impl Into<String>, data: impl Into<String>, media_type: &str) -> Self {
        Self {
            question_id: question_id.into(),
            answer: AnswerValue::Audio {
                data: data.into(),
                media_type: Some(media_type.to_string()),
            },
            is_correct: None,
            feedback: None,
            score: None,
        }
    }
}

/// The graded outcome of one section. Built once per skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    pub skill: Skill,
    pub questions: Vec<Question>,
    pub answers: Vec<StudentAnswer>,
    /// Percentage in [0, 100], unrounded.
    pub score: Option<f64>,
    pub feedback: Option<String>,
}

impl SectionResult {
    /// Number of distinct items answered correctly.
    pub fn correct_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|a| a.is_correct == Some(true))
            .map(|a| a.question_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Number of gradable items: sub-questions for comprehension tasks,
    /// the questions themselves otherwise.
    pub fn gradable_count(&self) -> usize {
        match self.questions.first() {
            Some(Question::ReadingTask(t)) => t.sub_questions.len(),
            Some(Question::ListeningTask(t)) => t.sub_questions.len(),
            _ => self.questions.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSummary {
    pub skill: Skill,
    pub score: Option<f64>,
    pub achieved_level: Option<String>,
    pub strengths: String,
    pub weaknesses: String,
    pub recommendations: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub student_name: String,
    pub assessed_level: ProficiencyLevel,
    pub overall_estimated_level: String,
    pub skill_summaries: Vec<SkillSummary>,
    pub detailed_feedback: String,
    pub level_progression_suggestion: String,
}
