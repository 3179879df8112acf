//! Report Synthesizer
//!
//! Summarizes every section result for the provider, maps its answer onto a
//! [`FinalReport`] and derives the level progression suggestion locally.

use crate::error::{AssessmentError, Result};
use crate::llm_client::{LLMClient, StructuredRequest, parse_structured};
use crate::model::{FinalReport, ProficiencyLevel, SectionResult, Skill, SkillSummary};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const HIGH_QUALIFIERS: [&str; 4] = ["high", "upper", "alto", "superior"];
const LOW_QUALIFIERS: [&str; 2] = ["low", "baixo"];

pub const UNDETERMINED_PROGRESSION: &str =
    "Could not determine a level progression suggestion from the provided estimate.";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ReportPayload {
    overall_estimated_cefr_level: String,
    #[serde(default)]
    skill_summaries: Vec<SkillSummaryPayload>,
    detailed_feedback: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SkillSummaryPayload {
    skill: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    achieved_level: Option<String>,
    #[serde(default)]
    strengths: String,
    #[serde(default)]
    weaknesses: String,
    #[serde(default)]
    recommendations: String,
}

/// One line per section, as sent to the provider.
pub fn summarize_results(results: &[SectionResult]) -> String {
    results
        .iter()
        .map(|result| {
            let mut line = format!("Skill: {}, ", result.skill.label());
            match result.score {
                Some(score) => line.push_str(&format!("Score: {score:.0}%. ")),
                None => line.push_str("Score: N/A. "),
            }
            match &result.feedback {
                Some(feedback) if result.skill.is_free_form() => {
                    line.push_str(&format!("AI Feedback: \"{feedback}\". "));
                }
                _ => {
                    let total = result.gradable_count();
                    if !result.answers.is_empty() && total > 0 {
                        line.push_str(&format!(
                            "Correct answers: {} out of {}. ",
                            result.correct_count(),
                            total
                        ));
                    }
                }
            }
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolves a provider-supplied skill name.
///
/// Exact label or variant names win; otherwise the best fuzzy match in either
/// direction is taken ("Listening Comprehension" → Listening).
pub fn match_skill(name: &str) -> Option<Skill> {
    if let Ok(skill) = name.parse::<Skill>() {
        return Some(skill);
    }
    let wanted = name.trim();
    if wanted.is_empty() {
        return None;
    }
    let matcher = SkimMatcherV2::default().ignore_case();
    Skill::ORDER
        .into_iter()
        .filter_map(|skill| {
            let variant = format!("{:?}", skill);
            [skill.label(), variant.as_str()]
                .into_iter()
                .flat_map(|candidate| {
                    [
                        matcher.fuzzy_match(candidate, wanted),
                        matcher.fuzzy_match(wanted, candidate),
                    ]
                })
                .flatten()
                .max()
                .map(|score| (score, skill))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, skill)| skill)
}

/// Compares the provider's free-text estimate with the assessed level.
///
/// The level token and the high/low qualifiers are found by substring
/// matching over prose, so the result is a heuristic.
pub fn level_progression_suggestion(estimated: &str, assessed: ProficiencyLevel) -> String {
    let Some(estimated_level) = ProficiencyLevel::extract_from_text(estimated) else {
        return UNDETERMINED_PROGRESSION.to_string();
    };
    let display = estimated.trim();

    if estimated_level > assessed {
        format!(
            "Excellent performance! Based on your results (assessed as {display}), we suggest you advance to the next level ({estimated_level}). Keep it up!"
        )
    } else if estimated_level < assessed {
        format!(
            "Your performance (assessed as {display}) indicates it may help to review the {estimated_level} fundamentals or strengthen the {assessed} foundations before attempting a more advanced level."
        )
    } else {
        let lowered = estimated.to_lowercase();
        if HIGH_QUALIFIERS.iter().any(|q| lowered.contains(q)) {
            format!(
                "Very good! You show a strong command of {assessed} (assessed as {display}). Consolidate it with extra challenges at this level or get ready to advance."
            )
        } else if LOW_QUALIFIERS.iter().any(|q| lowered.contains(q)) {
            format!(
                "You are progressing within {assessed} (assessed as {display}). Keep practicing the areas for improvement to consolidate your knowledge at this level."
            )
        } else {
            format!(
                "You are consistently operating at {assessed} (assessed as {display}). Consolidate your skills and explore more complex topics within this level."
            )
        }
    }
}

pub struct ReportSynthesizer {
    llm: Arc<dyn LLMClient>,
}

impl ReportSynthesizer {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }

    #[instrument(skip_all, fields(student = %student_name, assessed_level = %assessed_level, sections = results.len()))]
    pub async fn synthesize(
        &self,
        student_name: &str,
        results: &[SectionResult],
        assessed_level: ProficiencyLevel,
    ) -> Result<FinalReport> {
        let summary = summarize_results(results);
        let instructions = format!(
            "A student named {student_name} completed an assessment for CEFR level {assessed_level}. \
             Performance summary:\n{summary}\n\
             Generate a comprehensive report: an overall estimated CEFR level, a breakdown of strengths, \
             weaknesses and recommendations for each skill, and detailed overall feedback. \
             The text should be professional."
        );
        let skill_labels: Vec<&str> = Skill::ORDER.iter().map(Skill::label).collect();
        let schema = json!({
            "type": "object",
            "properties": {
                "overallEstimatedCefrLevel": { "type": "string" },
                "skillSummaries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "skill": { "type": "string", "enum": skill_labels },
                            "score": { "type": ["number", "null"] },
                            "achievedLevel": { "type": ["string", "null"] },
                            "strengths": { "type": "string" },
                            "weaknesses": { "type": "string" },
                            "recommendations": { "type": "string" }
                        },
                        "required": ["skill", "strengths", "weaknesses", "recommendations"]
                    }
                },
                "detailedFeedback": { "type": "string" }
            },
            "required": ["overallEstimatedCefrLevel", "skillSummaries", "detailedFeedback"]
        });

        let text = self
            .llm
            .generate_structured(StructuredRequest::new(instructions, "final_report", schema))
            .await
            .map_err(|e| AssessmentError::ReportSynthesis(e.to_string()))?;
        let payload: ReportPayload = parse_structured(&text).map_err(|e| {
            AssessmentError::ReportSynthesis(format!("unreadable report response: {e}"))
        })?;

        let mut skill_summaries: Vec<SkillSummary> = Vec::new();
        for summary in payload.skill_summaries {
            let Some(skill) = match_skill(&summary.skill) else {
                warn!(skill = %summary.skill, "Dropping summary for an unknown skill");
                continue;
            };
            if skill_summaries.iter().any(|s| s.skill == skill) {
                warn!(%skill, "Dropping duplicate skill summary");
                continue;
            }
            skill_summaries.push(SkillSummary {
                skill,
                score: summary.score,
                achieved_level: summary.achieved_level,
                strengths: summary.strengths,
                weaknesses: summary.weaknesses,
                recommendations: summary.recommendations,
            });
        }
        skill_summaries.sort_by_key(|s| s.skill.position());

        let level_progression_suggestion =
            level_progression_suggestion(&payload.overall_estimated_cefr_level, assessed_level);
        info!(estimated = %payload.overall_estimated_cefr_level, "Report synthesized");

        Ok(FinalReport {
            student_name: student_name.to_string(),
            assessed_level,
            overall_estimated_level: payload.overall_estimated_cefr_level,
            skill_summaries,
            detailed_feedback: payload.detailed_feedback,
            level_progression_suggestion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockLLMClient;
    use crate::model::{
        FreeFormTask, MultipleChoiceQuestion, Question, QuestionOption, ReadingTask, StudentAnswer,
    };

    fn mcq(id: &str, skill: Skill) -> MultipleChoiceQuestion {
        MultipleChoiceQuestion {
            id: id.into(),
            skill,
            level: ProficiencyLevel::B1,
            prompt_text: "?".into(),
            options: vec![QuestionOption {
                id: "A".into(),
                text: "a".into(),
            }],
            correct_option_id: "A".into(),
        }
    }

    fn graded(id: &str, correct: bool) -> StudentAnswer {
        let mut answer = StudentAnswer::text(id, "A");
        answer.is_correct = Some(correct);
        answer
    }

    fn sample_results() -> Vec<SectionResult> {
        vec![
            SectionResult {
                skill: Skill::Vocabulary,
                questions: vec![
                    Question::MultipleChoice(mcq("vocabulary-B1-0", Skill::Vocabulary)),
                    Question::MultipleChoice(mcq("vocabulary-B1-1", Skill::Vocabulary)),
                ],
                answers: vec![graded("vocabulary-B1-0", true), graded("vocabulary-B1-1", false)],
                score: Some(50.0),
                feedback: None,
            },
            SectionResult {
                skill: Skill::Reading,
                questions: vec![Question::ReadingTask(ReadingTask {
                    id: "reading-comprehension-B1-0".into(),
                    level: ProficiencyLevel::B1,
                    prompt_text: "Read".into(),
                    passage: "p".into(),
                    sub_questions: vec![
                        mcq("reading-comprehension-B1-0-0", Skill::Reading),
                        mcq("reading-comprehension-B1-0-1", Skill::Reading),
                        mcq("reading-comprehension-B1-0-2", Skill::Reading),
                    ],
                })],
                answers: vec![
                    graded("reading-comprehension-B1-0-0", true),
                    graded("reading-comprehension-B1-0-1", true),
                    graded("reading-comprehension-B1-0-2", false),
                ],
                score: Some(200.0 / 3.0),
                feedback: None,
            },
            SectionResult {
                skill: Skill::Writing,
                questions: vec![Question::WritingTask(FreeFormTask {
                    id: "writing-B1-0".into(),
                    level: ProficiencyLevel::B1,
                    prompt_text: "Write".into(),
                    task_description: None,
                })],
                answers: vec![StudentAnswer::text("writing-B1-0", "text")],
                score: Some(72.0),
                feedback: Some("Clear structure.".into()),
            },
            SectionResult {
                skill: Skill::Speaking,
                questions: vec![],
                answers: vec![],
                score: None,
                feedback: None,
            },
        ]
    }

    #[test]
    fn test_summary_lines() {
        let summary = summarize_results(&sample_results());
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(
            lines,
            [
                "Skill: Vocabulary, Score: 50%. Correct answers: 1 out of 2.",
                "Skill: Reading Comprehension, Score: 67%. Correct answers: 2 out of 3.",
                "Skill: Writing, Score: 72%. AI Feedback: \"Clear structure.\".",
                "Skill: Speaking, Score: N/A.",
            ]
        );
    }

    #[test]
    fn test_progression_advance_review_consolidate() {
        let advance = level_progression_suggestion("B2", ProficiencyLevel::B1);
        assert!(advance.contains("advance to the next level (B2)"));

        let review = level_progression_suggestion("A2", ProficiencyLevel::B1);
        assert!(review.contains("review the A2 fundamentals"));

        let consolidate = level_progression_suggestion("B1", ProficiencyLevel::B1);
        assert!(consolidate.contains("consistently operating at B1"));
        assert!(consolidate.contains("Consolidate"));
    }

    #[test]
    fn test_progression_qualifiers() {
        let high = level_progression_suggestion("High B1", ProficiencyLevel::B1);
        assert!(high.contains("strong command of B1"));
        let upper = level_progression_suggestion("upper-intermediate b1", ProficiencyLevel::B1);
        assert!(upper.contains("strong command of B1"));
        let low = level_progression_suggestion("B1 (low)", ProficiencyLevel::B1);
        assert!(low.contains("progressing within B1"));
    }

    #[test]
    fn test_progression_without_level_token() {
        assert_eq!(
            level_progression_suggestion("Intermediate", ProficiencyLevel::B1),
            UNDETERMINED_PROGRESSION
        );
        assert_eq!(
            level_progression_suggestion("", ProficiencyLevel::C2),
            UNDETERMINED_PROGRESSION
        );
    }

    #[test]
    fn test_match_skill() {
        assert_eq!(match_skill("Oral Comprehension"), Some(Skill::Listening));
        assert_eq!(match_skill("listening"), Some(Skill::Listening));
        assert_eq!(match_skill("Listening Comprehension"), Some(Skill::Listening));
        assert_eq!(match_skill("Reading"), Some(Skill::Reading));
        assert_eq!(match_skill("vocab"), Some(Skill::Vocabulary));
        assert_eq!(match_skill("Pronunciation"), None);
        assert_eq!(match_skill(""), None);
    }

    #[tokio::test]
    async fn test_synthesize_report() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .withf(|req| {
                req.instructions.contains("A student named Ana")
                    && req.instructions.contains("Correct answers: 2 out of 3.")
                    && req.schema_name == "final_report"
            })
            .times(1)
            .returning(|_| {
                Ok(json!({
                    "overallEstimatedCefrLevel": "B2 (Upper Intermediate)",
                    "skillSummaries": [
                        { "skill": "Writing", "score": 72, "strengths": "s", "weaknesses": "w", "recommendations": "r" },
                        { "skill": "Vocabulary", "achievedLevel": "B1", "strengths": "s", "weaknesses": "w", "recommendations": "r" },
                        { "skill": "Pronunciation", "strengths": "s", "weaknesses": "w", "recommendations": "r" }
                    ],
                    "detailedFeedback": "Solid performance overall."
                })
                .to_string())
            });

        let report = ReportSynthesizer::new(Arc::new(llm))
            .synthesize("Ana", &sample_results(), ProficiencyLevel::B1)
            .await
            .unwrap();

        assert_eq!(report.student_name, "Ana");
        assert_eq!(report.assessed_level, ProficiencyLevel::B1);
        assert_eq!(report.overall_estimated_level, "B2 (Upper Intermediate)");
        let skills: Vec<Skill> = report.skill_summaries.iter().map(|s| s.skill).collect();
        assert_eq!(skills, [Skill::Vocabulary, Skill::Writing]);
        assert_eq!(report.skill_summaries[1].score, Some(72.0));
        assert_eq!(report.detailed_feedback, "Solid performance overall.");
        assert!(report.level_progression_suggestion.contains("advance"));
    }

    #[tokio::test]
    async fn test_synthesis_failures() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(|_| Err(anyhow::anyhow!("rate limited")));
        let err = ReportSynthesizer::new(Arc::new(llm))
            .synthesize("Ana", &[], ProficiencyLevel::B1)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::ReportSynthesis(_)));

        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(|_| Ok("{\"skillSummaries\": []}".to_string()));
        let err = ReportSynthesizer::new(Arc::new(llm))
            .synthesize("Ana", &[], ProficiencyLevel::B1)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::ReportSynthesis(_)));
    }
}
