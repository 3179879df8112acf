//! Response Scorer
//!
//! Grades a section. Objective items are graded by rule; Writing and
//! Speaking are delegated to the grading provider.

use crate::config::AssessmentConfig;
use crate::error::{AssessmentError, Result};
use crate::llm_client::{InlineAudio, LLMClient, StructuredRequest, parse_structured};
use crate::model::{
    AnswerValue, FreeFormTask, MultipleChoiceQuestion, ProficiencyLevel, Question, SectionResult,
    Skill, StudentAnswer,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Feedback for a Writing section submitted without text.
pub const NO_WRITTEN_RESPONSE: &str = "No answer provided.";
/// Feedback for a Speaking section submitted without a recording.
pub const NO_SPOKEN_RESPONSE: &str = "No audio provided.";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GradingPayload {
    score: f64,
    feedback: String,
    #[serde(default)]
    estimated_cefr_level: Option<String>,
}

/// Whether a fill-in-the-blank submission matches, ignoring surrounding
/// whitespace and case.
pub fn fill_blank_matches(expected: &str, submitted: &str) -> bool {
    expected.trim().to_lowercase() == submitted.trim().to_lowercase()
}

/// Whether a multiple-choice submission names the correct option id exactly.
pub fn choice_matches(question: &MultipleChoiceQuestion, submitted: &AnswerValue) -> bool {
    submitted.as_text() == Some(question.correct_option_id.as_str())
}

fn percentage(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (correct as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

enum Gradable<'a> {
    Choice(&'a MultipleChoiceQuestion),
    Blank(&'a str),
}

/// Collects the items answers are graded against, keyed by id.
fn gradable_items(questions: &[Question]) -> HashMap<&str, Gradable<'_>> {
    let mut items = HashMap::new();
    for question in questions {
        match question {
            Question::MultipleChoice(q) => {
                items.insert(q.id.as_str(), Gradable::Choice(q));
            }
            Question::FillBlank(q) => {
                items.insert(q.id.as_str(), Gradable::Blank(q.correct_answer.as_str()));
            }
            Question::ReadingTask(t) => {
                for sub in &t.sub_questions {
                    items.insert(sub.id.as_str(), Gradable::Choice(sub));
                }
            }
            Question::ListeningTask(t) => {
                for sub in &t.sub_questions {
                    items.insert(sub.id.as_str(), Gradable::Choice(sub));
                }
            }
            Question::WritingTask(_) | Question::SpeakingTask(_) => {}
        }
    }
    items
}

pub struct ResponseScorer {
    llm: Arc<dyn LLMClient>,
    config: AssessmentConfig,
}

impl ResponseScorer {
    pub fn new(llm: Arc<dyn LLMClient>, config: AssessmentConfig) -> Self {
        Self { llm, config }
    }

    /// Grades one section's answers and builds its result.
    #[instrument(skip_all, fields(skill = %skill, level = %level, answers = answers.len()))]
    pub async fn score(
        &self,
        skill: Skill,
        level: ProficiencyLevel,
        questions: &[Question],
        answers: Vec<StudentAnswer>,
    ) -> Result<SectionResult> {
        let result = if skill.is_free_form() {
            self.score_free_form(skill, level, questions, answers)
                .await?
        } else {
            score_objective(skill, questions, answers)
        };
        info!(score = ?result.score, "Section scored");
        Ok(result)
    }

    async fn score_free_form(
        &self,
        skill: Skill,
        level: ProficiencyLevel,
        questions: &[Question],
        answers: Vec<StudentAnswer>,
    ) -> Result<SectionResult> {
        let task = questions
            .iter()
            .find_map(|q| match q {
                Question::WritingTask(t) | Question::SpeakingTask(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| AssessmentError::Scoring {
                skill,
                reason: "the section has no task to grade".to_string(),
            })?;

        let (mut matched, mut others): (Vec<_>, Vec<_>) =
            answers.into_iter().partition(|a| a.question_id == task.id);
        if matched.len() > 1 {
            warn!(count = matched.len(), "Several answers for a single task; grading the first");
            others.extend(matched.drain(1..));
        }
        for other in &mut others {
            warn!(question_id = %other.question_id, "Answer does not match the section task");
            other.is_correct = Some(false);
        }

        let mut answer = match matched.pop() {
            Some(answer) => answer,
            None => match skill {
                Skill::Speaking => StudentAnswer::audio(&task.id, "", &self.config.recording_media_type),
                _ => StudentAnswer::text(&task.id, ""),
            },
        };

        let (score, feedback) = if answer.answer.is_blank() {
            let feedback = match skill {
                Skill::Speaking => NO_SPOKEN_RESPONSE,
                _ => NO_WRITTEN_RESPONSE,
            };
            (0.0, feedback.to_string())
        } else {
            let graded = self.grade(skill, level, task, &answer.answer).await?;
            (graded.score.clamp(0.0, 100.0), graded.feedback)
        };

        answer.score = Some(score);
        answer.feedback = Some(feedback.clone());
        let mut answers = vec![answer];
        answers.extend(others);

        Ok(SectionResult {
            skill,
            questions: questions.to_vec(),
            answers,
            score: Some(score),
            feedback: Some(feedback),
        })
    }

    async fn grade(
        &self,
        skill: Skill,
        level: ProficiencyLevel,
        task: &FreeFormTask,
        submission: &AnswerValue,
    ) -> Result<GradingPayload> {
        let schema = json!({
            "type": "object",
            "properties": {
                "score": { "type": "number", "minimum": 0, "maximum": 100 },
                "feedback": { "type": "string" },
                "estimatedCefrLevel": { "type": "string" }
            },
            "required": ["score", "feedback", "estimatedCefrLevel"]
        });

        let request = match submission {
            AnswerValue::Text { value } => StructuredRequest::new(
                format!(
                    "A student at CEFR level {level} was given the {} prompt: \"{}\". \
                     Student response: \"{}\". \
                     Assess based on grammar, vocabulary, task achievement, coherence and cohesion for CEFR {level}. \
                     Provide constructive feedback and a score from 0 to 100.",
                    skill.label().to_lowercase(),
                    task.prompt_text,
                    value.trim()
                ),
                "free_form_assessment",
                schema,
            ),
            AnswerValue::Audio { data, media_type } => StructuredRequest::new(
                format!(
                    "A student at CEFR level {level} was given the {} prompt: \"{}\". \
                     Their audio response is provided. \
                     Assess fluency, pronunciation, intonation, grammar, vocabulary and task fulfillment for CEFR {level}. \
                     Provide constructive feedback and a score from 0 to 100.",
                    skill.label().to_lowercase(),
                    task.prompt_text
                ),
                "free_form_assessment",
                schema,
            )
            .with_audio(InlineAudio {
                media_type: media_type
                    .clone()
                    .unwrap_or_else(|| self.config.recording_media_type.clone()),
                data_base64: data.clone(),
            }),
        };

        let text = self
            .llm
            .generate_structured(request)
            .await
            .map_err(|e| AssessmentError::Scoring {
                skill,
                reason: e.to_string(),
            })?;
        let payload: GradingPayload =
            parse_structured(&text).map_err(|e| AssessmentError::Scoring {
                skill,
                reason: format!("unreadable grading response: {e}"),
            })?;
        if let Some(estimated) = &payload.estimated_cefr_level {
            info!(estimated_level = %estimated, "Provider estimate for free-form answer");
        }
        Ok(payload)
    }
}

fn score_objective(
    skill: Skill,
    questions: &[Question],
    mut answers: Vec<StudentAnswer>,
) -> SectionResult {
    let items = gradable_items(questions);
    let mut graded = HashSet::new();
    for answer in &mut answers {
        if !graded.insert(answer.question_id.clone()) {
            warn!(question_id = %answer.question_id, "Repeated answer for an item, only the first counts");
            answer.is_correct = Some(false);
            continue;
        }
        let correct = match items.get(answer.question_id.as_str()) {
            Some(Gradable::Choice(q)) => choice_matches(q, &answer.answer),
            Some(Gradable::Blank(expected)) => answer
                .answer
                .as_text()
                .is_some_and(|text| fill_blank_matches(expected, text)),
            None => {
                warn!(question_id = %answer.question_id, "Answer does not match any gradable item");
                false
            }
        };
        answer.is_correct = Some(correct);
    }

    let mut result = SectionResult {
        skill,
        questions: questions.to_vec(),
        answers,
        score: None,
        feedback: None,
    };
    result.score = Some(percentage(result.correct_count(), items.len()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockLLMClient;
    use crate::model::{FillBlankQuestion, ListeningTask, QuestionOption, ReadingTask};
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    fn mcq(id: &str, skill: Skill, correct: &str) -> MultipleChoiceQuestion {
        MultipleChoiceQuestion {
            id: id.to_string(),
            skill,
            level: ProficiencyLevel::B1,
            prompt_text: "Pick one".to_string(),
            options: ["A", "B", "C"]
                .iter()
                .map(|k| QuestionOption {
                    id: k.to_string(),
                    text: format!("option {k}"),
                })
                .collect(),
            correct_option_id: correct.to_string(),
        }
    }

    fn scorer(llm: MockLLMClient) -> ResponseScorer {
        ResponseScorer::new(Arc::new(llm), AssessmentConfig::default())
    }

    fn writing_task() -> Vec<Question> {
        vec![Question::WritingTask(FreeFormTask {
            id: "writing-B1-0".into(),
            level: ProficiencyLevel::B1,
            prompt_text: "Describe your weekend.".into(),
            task_description: None,
        })]
    }

    fn speaking_task() -> Vec<Question> {
        vec![Question::SpeakingTask(FreeFormTask {
            id: "speaking-B1-0".into(),
            level: ProficiencyLevel::B1,
            prompt_text: "Talk about your city.".into(),
            task_description: None,
        })]
    }

    #[test]
    fn test_fill_blank_matching() {
        assert!(fill_blank_matches("Paris", " paris "));
        assert!(fill_blank_matches("Paris", "paris "));
        assert!(fill_blank_matches(" Paris", "PARIS"));
        assert!(!fill_blank_matches("Paris", "Pariss"));
        assert!(!fill_blank_matches("Paris", ""));
    }

    #[test]
    fn test_choice_requires_exact_option_id() {
        let q = mcq("grammar-B1-0", Skill::Grammar, "B");
        assert!(choice_matches(&q, &AnswerValue::Text { value: "B".into() }));
        assert!(!choice_matches(&q, &AnswerValue::Text { value: "b".into() }));
        assert!(!choice_matches(&q, &AnswerValue::Text { value: " B".into() }));
        assert!(!choice_matches(
            &q,
            &AnswerValue::Text {
                value: "option B".into()
            }
        ));
    }

    #[tokio::test]
    async fn test_vocabulary_section_score() {
        let questions = vec![
            Question::MultipleChoice(mcq("vocabulary-B1-0", Skill::Vocabulary, "A")),
            Question::MultipleChoice(mcq("vocabulary-B1-1", Skill::Vocabulary, "B")),
            Question::FillBlank(FillBlankQuestion {
                id: "vocabulary-B1-2".into(),
                skill: Skill::Vocabulary,
                level: ProficiencyLevel::B1,
                prompt_text: "The capital of France is ___".into(),
                correct_answer: "Paris".into(),
            }),
        ];
        let answers = vec![
            StudentAnswer::text("vocabulary-B1-0", "A"),
            StudentAnswer::text("vocabulary-B1-1", "C"),
            StudentAnswer::text("vocabulary-B1-2", " paris "),
        ];
        let result = scorer(MockLLMClient::new())
            .score(Skill::Vocabulary, ProficiencyLevel::B1, &questions, answers)
            .await
            .unwrap();

        let marks: Vec<Option<bool>> = result.answers.iter().map(|a| a.is_correct).collect();
        assert_eq!(marks, [Some(true), Some(false), Some(true)]);
        assert_abs_diff_eq!(result.score.unwrap(), 200.0 / 3.0, epsilon = 1e-9);
        assert!(result.feedback.is_none());
    }

    #[tokio::test]
    async fn test_repeated_answer_counts_once() {
        let questions = vec![
            Question::MultipleChoice(mcq("vocabulary-B1-0", Skill::Vocabulary, "A")),
            Question::MultipleChoice(mcq("vocabulary-B1-1", Skill::Vocabulary, "A")),
            Question::MultipleChoice(mcq("vocabulary-B1-2", Skill::Vocabulary, "A")),
        ];
        let answers = vec![
            StudentAnswer::text("vocabulary-B1-0", "A"),
            StudentAnswer::text("vocabulary-B1-0", "A"),
            StudentAnswer::text("vocabulary-B1-0", "A"),
        ];
        let result = scorer(MockLLMClient::new())
            .score(Skill::Vocabulary, ProficiencyLevel::B1, &questions, answers)
            .await
            .unwrap();

        let marks: Vec<Option<bool>> = result.answers.iter().map(|a| a.is_correct).collect();
        assert_eq!(marks, [Some(true), Some(false), Some(false)]);
        assert_eq!(result.correct_count(), 1);
        assert_eq!(result.gradable_count(), 3);
        assert_abs_diff_eq!(result.score.unwrap(), 100.0 / 3.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_unmatched_answer_is_kept_and_incorrect() {
        let questions = vec![Question::MultipleChoice(mcq("grammar-B1-0", Skill::Grammar, "A"))];
        let answers = vec![
            StudentAnswer::text("grammar-B1-0", "A"),
            StudentAnswer::text("grammar-B1-9", "A"),
        ];
        let result = scorer(MockLLMClient::new())
            .score(Skill::Grammar, ProficiencyLevel::B1, &questions, answers)
            .await
            .unwrap();
        assert_eq!(result.answers.len(), 2);
        assert_eq!(result.answers[1].is_correct, Some(false));
        assert_abs_diff_eq!(result.score.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn test_reading_grades_sub_questions() {
        let questions = vec![Question::ReadingTask(ReadingTask {
            id: "reading-comprehension-B1-0".into(),
            level: ProficiencyLevel::B1,
            prompt_text: "Read".into(),
            passage: "Text".into(),
            sub_questions: vec![
                mcq("reading-comprehension-B1-0-0", Skill::Reading, "A"),
                mcq("reading-comprehension-B1-0-1", Skill::Reading, "B"),
                mcq("reading-comprehension-B1-0-2", Skill::Reading, "C"),
            ],
        })];
        let answers = vec![
            StudentAnswer::text("reading-comprehension-B1-0-0", "A"),
            StudentAnswer::text("reading-comprehension-B1-0-1", "B"),
            StudentAnswer::text("reading-comprehension-B1-0-2", "A"),
        ];
        let result = scorer(MockLLMClient::new())
            .score(Skill::Reading, ProficiencyLevel::B1, &questions, answers)
            .await
            .unwrap();
        let score = result.score.unwrap();
        assert_abs_diff_eq!(score, 66.666_666, epsilon = 1e-4);
        assert_eq!(format!("{score:.0}"), "67");
    }

    #[tokio::test]
    async fn test_listening_without_sub_questions_scores_zero() {
        let questions = vec![Question::ListeningTask(ListeningTask {
            id: "oral-comprehension-B1-0".into(),
            level: ProficiencyLevel::B1,
            prompt_text: "Listen".into(),
            dialogue_title: None,
            dialogue_lines: vec![],
            speaker_voice_map: BTreeMap::new(),
            sub_questions: vec![],
        })];
        let result = scorer(MockLLMClient::new())
            .score(Skill::Listening, ProficiencyLevel::B1, &questions, vec![])
            .await
            .unwrap();
        assert_eq!(result.score, Some(0.0));
    }

    #[tokio::test]
    async fn test_writing_uses_provider_score_and_feedback() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .withf(|req| {
                req.instructions.contains("Describe your weekend.")
                    && req.instructions.contains("I went hiking.")
                    && req.audio.is_none()
            })
            .times(1)
            .returning(|_| {
                Ok(json!({ "score": 72, "feedback": "Good range of tenses.", "estimatedCefrLevel": "B1" })
                    .to_string())
            });

        let result = scorer(llm)
            .score(
                Skill::Writing,
                ProficiencyLevel::B1,
                &writing_task(),
                vec![StudentAnswer::text("writing-B1-0", "I went hiking.")],
            )
            .await
            .unwrap();

        assert_eq!(result.score, Some(72.0));
        assert_eq!(result.feedback.as_deref(), Some("Good range of tenses."));
        assert_eq!(result.answers[0].score, Some(72.0));
        assert_eq!(result.answers[0].feedback.as_deref(), Some("Good range of tenses."));
    }

    #[tokio::test]
    async fn test_blank_writing_skips_provider() {
        // No expectations: any provider call would panic.
        let llm = MockLLMClient::new();
        let result = scorer(llm)
            .score(
                Skill::Writing,
                ProficiencyLevel::B1,
                &writing_task(),
                vec![StudentAnswer::text("writing-B1-0", "   ")],
            )
            .await
            .unwrap();
        assert_eq!(result.score, Some(0.0));
        assert_eq!(result.feedback.as_deref(), Some(NO_WRITTEN_RESPONSE));
    }

    #[tokio::test]
    async fn test_missing_speaking_answer_skips_provider() {
        let result = scorer(MockLLMClient::new())
            .score(Skill::Speaking, ProficiencyLevel::B1, &speaking_task(), vec![])
            .await
            .unwrap();
        assert_eq!(result.score, Some(0.0));
        assert_eq!(result.feedback.as_deref(), Some(NO_SPOKEN_RESPONSE));
        assert_eq!(result.answers.len(), 1);
        assert_eq!(result.answers[0].question_id, "speaking-B1-0");
    }

    #[tokio::test]
    async fn test_speaking_sends_audio_with_media_type() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .withf(|req| {
                req.audio.as_ref().is_some_and(|a| {
                    a.media_type == "audio/webm;codecs=opus" && a.data_base64 == "UklGRg=="
                })
            })
            .times(1)
            .returning(|_| {
                Ok(json!({ "score": 150, "feedback": "Fluent.", "estimatedCefrLevel": "C1" })
                    .to_string())
            });
        let answer = StudentAnswer {
            question_id: "speaking-B1-0".into(),
            answer: AnswerValue::Audio {
                data: "UklGRg==".into(),
                media_type: None,
            },
            is_correct: None,
            feedback: None,
            score: None,
        };
        let result = scorer(llm)
            .score(Skill::Speaking, ProficiencyLevel::B1, &speaking_task(), vec![answer])
            .await
            .unwrap();
        assert_eq!(result.score, Some(100.0));
    }

    #[tokio::test]
    async fn test_provider_failure_is_scoring_error() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(|_| Err(anyhow::anyhow!("deadline exceeded")));
        let err = scorer(llm)
            .score(
                Skill::Writing,
                ProficiencyLevel::B1,
                &writing_task(),
                vec![StudentAnswer::text("writing-B1-0", "Some text")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Scoring { skill: Skill::Writing, .. }));
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn test_unreadable_grading_is_scoring_error() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(|_| Ok("{\"feedback\": \"no score\"}".to_string()));
        let err = scorer(llm)
            .score(
                Skill::Writing,
                ProficiencyLevel::B1,
                &writing_task(),
                vec![StudentAnswer::text("writing-B1-0", "Some text")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Scoring { .. }));
    }
}
