//! Content Generator
//!
//! Builds one provider request per skill, validates the structured response
//! and turns it into typed questions with deterministic ids. Listening tasks
//! additionally get a cast of two voices from the registry.

use crate::config::AssessmentConfig;
use crate::error::{AssessmentError, Result};
use crate::llm_client::{LLMClient, StructuredRequest, parse_structured};
use crate::model::{
    DialogueLine, FreeFormTask, ListeningTask, MultipleChoiceQuestion, ProficiencyLevel, Question,
    QuestionOption, ReadingTask, Skill, question_id,
};
use crate::voices::{self, RandomSource, SeededRandom, VoiceProfile};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

// --- Provider payloads ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct McqItem {
    question_text: String,
    options: BTreeMap<String, String>,
    correct_answer_key: String,
}

#[derive(Deserialize, Debug)]
struct McqPayload {
    questions: Vec<McqItem>,
}

#[derive(Deserialize, Debug)]
struct ReadingPayload {
    passage: String,
    questions: Vec<McqItem>,
}

#[derive(Deserialize, Debug)]
struct CharacterAssignment {
    #[serde(rename = "character1_Name")]
    character1_name: String,
    #[serde(rename = "character1_TTSVoiceName")]
    character1_voice: String,
    #[serde(rename = "character2_Name")]
    character2_name: String,
    #[serde(rename = "character2_TTSVoiceName")]
    character2_voice: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListeningPayload {
    #[serde(default)]
    dialogue_title: Option<String>,
    character_assignment: CharacterAssignment,
    lines: Vec<DialogueLine>,
    questions: Vec<McqItem>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptPayload {
    prompt: String,
    #[serde(default)]
    task_description: Option<String>,
}

// --- Length bands ---

fn reading_length_band(level: ProficiencyLevel) -> &'static str {
    match level {
        ProficiencyLevel::A1 | ProficiencyLevel::A2 => "80-120 words",
        ProficiencyLevel::B1 => "120-180 words",
        ProficiencyLevel::B2 => "180-240 words",
        ProficiencyLevel::C1 | ProficiencyLevel::C2 => "240-300 words",
    }
}

fn writing_length_band(level: ProficiencyLevel) -> &'static str {
    match level {
        ProficiencyLevel::A1 | ProficiencyLevel::A2 => "40-60 words",
        ProficiencyLevel::B1 | ProficiencyLevel::B2 => "80-120 words",
        ProficiencyLevel::C1 | ProficiencyLevel::C2 => "150-200 words",
    }
}

fn speaking_length_band(level: ProficiencyLevel) -> &'static str {
    match level {
        ProficiencyLevel::A1 | ProficiencyLevel::A2 => "30-60 seconds",
        ProficiencyLevel::B1 | ProficiencyLevel::B2 => "1-2 minutes",
        ProficiencyLevel::C1 | ProficiencyLevel::C2 => "2-3 minutes",
    }
}

// --- Schemas ---

fn mcq_item_schema(option_keys: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = option_keys
        .iter()
        .map(|k| (k.to_string(), json!({ "type": "string" })))
        .collect();
    json!({
        "type": "object",
        "properties": {
            "questionText": { "type": "string" },
            "options": { "type": "object", "properties": properties, "required": option_keys },
            "correctAnswerKey": { "type": "string", "enum": option_keys }
        },
        "required": ["questionText", "options", "correctAnswerKey"]
    })
}

const FLAT_OPTION_KEYS: [&str; 4] = ["A", "B", "C", "D"];
const SUB_OPTION_KEYS: [&str; 3] = ["A", "B", "C"];

/// Generates the question set of one section.
pub struct ContentGenerator {
    llm: Arc<dyn LLMClient>,
    rng: Mutex<Box<dyn RandomSource>>,
    voice_registry: &'static [VoiceProfile],
    config: AssessmentConfig,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LLMClient>, config: AssessmentConfig) -> Self {
        Self {
            llm,
            rng: Mutex::new(Box::new(SeededRandom::from_entropy())),
            voice_registry: voices::VOICE_REGISTRY,
            config,
        }
    }

    /// Replaces the random source used for voice casting.
    pub fn with_random_source(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_voice_registry(mut self, registry: &'static [VoiceProfile]) -> Self {
        self.voice_registry = registry;
        self
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.config
    }

    /// Generates the questions for `skill` at `level`.
    ///
    /// Either the whole set is returned or the call fails; a partially valid
    /// response is never accepted.
    #[instrument(skip_all, fields(skill = %skill, level = %level))]
    pub async fn generate(&self, skill: Skill, level: ProficiencyLevel) -> Result<Vec<Question>> {
        let questions = match skill {
            Skill::Vocabulary | Skill::Grammar => self.generate_mcqs(skill, level).await?,
            Skill::Reading => self.generate_reading(level).await?,
            Skill::Listening => self.generate_listening(level).await?,
            Skill::Writing | Skill::Speaking => self.generate_prompt(skill, level).await?,
        };
        info!(count = questions.len(), "Generated section content");
        Ok(questions)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        skill: Skill,
        request: StructuredRequest,
    ) -> Result<T> {
        let text = self
            .llm
            .generate_structured(request)
            .await
            .map_err(|source| AssessmentError::Generation { skill, source })?;
        parse_structured(&text).map_err(|e| AssessmentError::MalformedResponse {
            skill,
            reason: e.to_string(),
        })
    }

    async fn generate_mcqs(&self, skill: Skill, level: ProficiencyLevel) -> Result<Vec<Question>> {
        let count = self.config.questions_for(skill);
        let specific = match skill {
            Skill::Vocabulary => {
                "Do NOT ask the student to describe an image. All information needed to answer must be present in the question text and options. Focus on word meaning, usage in context, synonyms or antonyms."
            }
            _ => {
                "Focus on common grammatical structures, tenses, prepositions, articles or sentence construction appropriate for the level."
            }
        };
        let instructions = format!(
            "You are an expert language assessment creator specializing in {skill} for English learners. \
             Generate {count} multiple-choice {} questions suitable for a CEFR {level} English learner. \
             {specific} Ensure correct grammar and spelling in all generated text. \
             The difficulty of the questions and vocabulary used must be appropriate for CEFR level {level}.",
            skill.label().to_lowercase()
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "questions": { "type": "array", "items": mcq_item_schema(&FLAT_OPTION_KEYS) }
            },
            "required": ["questions"]
        });

        let payload: McqPayload = self
            .request(skill, StructuredRequest::new(instructions, "mcq_questions", schema))
            .await?;
        if payload.questions.is_empty() {
            return Err(malformed(skill, "no questions returned"));
        }
        if payload.questions.len() != count {
            warn!(
                expected = count,
                received = payload.questions.len(),
                "Provider returned an unexpected number of questions"
            );
        }

        payload
            .questions
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                build_mcq(item, skill, level, index, None).map(Question::MultipleChoice)
            })
            .collect()
    }

    async fn generate_reading(&self, level: ProficiencyLevel) -> Result<Vec<Question>> {
        let skill = Skill::Reading;
        let subs = self.config.comprehension_sub_questions;
        let instructions = format!(
            "You are an expert language assessment creator. Generate 1 reading comprehension task for a CEFR {level} English learner. \
             The task consists of a reading passage and {subs} multiple-choice questions about the passage. \
             The passage should be {} long. Ensure content is appropriate for the CEFR level and all text values are in English.",
            reading_length_band(level)
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "passage": { "type": "string", "description": "The reading passage." },
                "questions": {
                    "type": "array",
                    "description": format!("Array of {subs} MCQ sub-questions."),
                    "items": mcq_item_schema(&SUB_OPTION_KEYS)
                }
            },
            "required": ["passage", "questions"]
        });

        let payload: ReadingPayload = self
            .request(skill, StructuredRequest::new(instructions, "reading_task", schema))
            .await?;
        if payload.passage.trim().is_empty() {
            return Err(malformed(skill, "empty passage"));
        }

        Ok(vec![Question::ReadingTask(ReadingTask {
            id: question_id(skill, level, 0, None),
            level,
            prompt_text: "Read the passage below and answer the questions that follow.".to_string(),
            passage: payload.passage,
            sub_questions: build_sub_questions(payload.questions, skill, level)?,
        })])
    }

    fn cast_voices(&self) -> Result<[VoiceProfile; 2]> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        voices::select_dialogue_voices(self.voice_registry, rng.as_mut()).ok_or_else(|| {
            AssessmentError::Generation {
                skill: Skill::Listening,
                source: anyhow::anyhow!("The voice registry is empty"),
            }
        })
    }

    async fn generate_listening(&self, level: ProficiencyLevel) -> Result<Vec<Question>> {
        let skill = Skill::Listening;
        let subs = self.config.comprehension_sub_questions;
        let [voice1, voice2] = self.cast_voices()?;
        let instructions = format!(
            "You are an expert language assessment creator. Pre-selected voices: \
             VOICE_INFO_1 ({}, name '{}', characteristic '{}') and VOICE_INFO_2 ({}, name '{}', characteristic '{}'). \
             Generate 1 listening task for CEFR {level} with a short dialogue (2-4 turns per speaker) \
             and {subs} multiple-choice questions about it. \
             Speakers in the JSON lines must match the characterAssignment names. \
             Ensure natural dialogue for the voices and level. All text in English.",
            voice1.gender, voice1.name, voice1.style, voice2.gender, voice2.name, voice2.style
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "dialogueTitle": { "type": ["string", "null"] },
                "characterAssignment": {
                    "type": "object",
                    "properties": {
                        "character1_Name": { "type": "string" },
                        "character1_TTSVoiceName": { "type": "string", "enum": [voice1.name] },
                        "character2_Name": { "type": "string" },
                        "character2_TTSVoiceName": { "type": "string", "enum": [voice2.name] }
                    },
                    "required": ["character1_Name", "character1_TTSVoiceName", "character2_Name", "character2_TTSVoiceName"]
                },
                "lines": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "speaker": { "type": "string" }, "line": { "type": "string" } },
                        "required": ["speaker", "line"]
                    }
                },
                "questions": { "type": "array", "items": mcq_item_schema(&SUB_OPTION_KEYS) }
            },
            "required": ["characterAssignment", "lines", "questions"]
        });

        let payload: ListeningPayload = self
            .request(skill, StructuredRequest::new(instructions, "listening_task", schema))
            .await?;
        if payload.lines.is_empty() {
            return Err(malformed(skill, "dialogue has no lines"));
        }

        let speaker_voice_map =
            assign_speaker_voices(&payload.character_assignment, &payload.lines, [voice1, voice2]);
        let dialogue_title = payload
            .dialogue_title
            .filter(|t| !t.trim().is_empty());
        let prompt_text = match &dialogue_title {
            Some(title) => format!("Listen to the dialogue titled \"{title}\" and answer the questions."),
            None => "Listen to the dialogue and answer the questions.".to_string(),
        };

        Ok(vec![Question::ListeningTask(ListeningTask {
            id: question_id(skill, level, 0, None),
            level,
            prompt_text,
            dialogue_title,
            dialogue_lines: payload.lines,
            speaker_voice_map,
            sub_questions: build_sub_questions(payload.questions, skill, level)?,
        })])
    }

    async fn generate_prompt(&self, skill: Skill, level: ProficiencyLevel) -> Result<Vec<Question>> {
        let (instructions, required) = match skill {
            Skill::Writing => (
                format!(
                    "You are an expert language assessment creator. Generate 1 writing prompt for a CEFR {level} English learner. \
                     The prompt should encourage a text of {}. All text in English.",
                    writing_length_band(level)
                ),
                json!(["prompt", "taskDescription"]),
            ),
            _ => (
                format!(
                    "You are an expert language assessment creator. Generate 1 speaking prompt for a CEFR {level} English learner. \
                     Encourage speech lasting {}. All text in English.",
                    speaking_length_band(level)
                ),
                json!(["prompt"]),
            ),
        };
        let schema = json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "taskDescription": { "type": "string" }
            },
            "required": required
        });
        let schema_name = format!("{}_prompt", skill.slug());

        let payload: PromptPayload = self
            .request(skill, StructuredRequest::new(instructions, schema_name, schema))
            .await?;
        if payload.prompt.trim().is_empty() {
            return Err(malformed(skill, "empty prompt"));
        }

        let task = FreeFormTask {
            id: question_id(skill, level, 0, None),
            level,
            prompt_text: payload.prompt,
            task_description: payload.task_description.filter(|d| !d.trim().is_empty()),
        };
        Ok(vec![match skill {
            Skill::Writing => Question::WritingTask(task),
            _ => Question::SpeakingTask(task),
        }])
    }
}

fn malformed(skill: Skill, reason: impl Into<String>) -> AssessmentError {
    AssessmentError::MalformedResponse {
        skill,
        reason: reason.into(),
    }
}

fn build_mcq(
    item: McqItem,
    skill: Skill,
    level: ProficiencyLevel,
    index: usize,
    sub_index: Option<usize>,
) -> Result<MultipleChoiceQuestion> {
    let id = question_id(skill, level, index, sub_index);
    if item.question_text.trim().is_empty() {
        return Err(malformed(skill, format!("question {id} has no text")));
    }
    if item.options.is_empty() {
        return Err(malformed(skill, format!("question {id} has no options")));
    }
    let correct_option_id = item.correct_answer_key.trim().to_string();
    if !item.options.contains_key(&correct_option_id) {
        return Err(malformed(
            skill,
            format!("question {id} names '{correct_option_id}' as correct, which is not an option"),
        ));
    }

    Ok(MultipleChoiceQuestion {
        id,
        skill,
        level,
        prompt_text: item.question_text,
        options: item
            .options
            .into_iter()
            .map(|(id, text)| QuestionOption { id, text })
            .collect(),
        correct_option_id,
    })
}

fn build_sub_questions(
    items: Vec<McqItem>,
    skill: Skill,
    level: ProficiencyLevel,
) -> Result<Vec<MultipleChoiceQuestion>> {
    items
        .into_iter()
        .enumerate()
        .map(|(sub, item)| build_mcq(item, skill, level, 0, Some(sub)))
        .collect()
}

/// Maps every dialogue speaker to one of the two cast voices.
///
/// The character assignment is trusted for names but not for voices: a voice
/// outside the cast is replaced by the cast voice for that slot. A speaker
/// missing from the assignment gets the first cast voice nobody holds yet.
fn assign_speaker_voices(
    assignment: &CharacterAssignment,
    lines: &[DialogueLine],
    cast: [VoiceProfile; 2],
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let slots = [
        (&assignment.character1_name, &assignment.character1_voice, cast[0]),
        (&assignment.character2_name, &assignment.character2_voice, cast[1]),
    ];
    for (name, voice, expected) in slots {
        if !voice.eq_ignore_ascii_case(expected.name) {
            warn!(
                character = %name,
                returned = %voice,
                expected = expected.name,
                "Provider assigned a voice outside the pre-selected cast"
            );
        }
        map.entry(name.clone())
            .or_insert_with(|| expected.name.to_string());
    }

    let speakers: BTreeSet<&str> = lines.iter().map(|l| l.speaker.as_str()).collect();
    for speaker in speakers {
        if map.contains_key(speaker) {
            continue;
        }
        let taken: BTreeSet<&String> = map.values().collect();
        let fallback = cast
            .iter()
            .find(|v| !taken.iter().any(|t| t.as_str() == v.name))
            .unwrap_or(&cast[0])
            .name
            .to_string();
        warn!(%speaker, voice = %fallback, "Dialogue speaker missing from character assignment");
        map.insert(speaker.to_string(), fallback);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::MockLLMClient;
    use crate::voices::VoiceGender;

    struct FirstPick;

    impl RandomSource for FirstPick {
        fn next_index(&mut self, _upper: usize) -> usize {
            0
        }
    }

    fn generator_returning(payload: Value) -> ContentGenerator {
        let body = payload.to_string();
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .times(1)
            .returning(move |_| Ok(body.clone()));
        ContentGenerator::new(Arc::new(llm), AssessmentConfig::default())
            .with_random_source(Box::new(FirstPick))
    }

    fn mcq(text: &str, correct: &str) -> Value {
        json!({
            "questionText": text,
            "options": { "D": "four", "B": "two", "A": "one", "C": "three" },
            "correctAnswerKey": correct
        })
    }

    fn sub_mcq(text: &str, correct: &str) -> Value {
        json!({
            "questionText": text,
            "options": { "A": "yes", "B": "no", "C": "maybe" },
            "correctAnswerKey": correct
        })
    }

    #[tokio::test]
    async fn test_vocabulary_questions_get_deterministic_ids() {
        let generator = generator_returning(json!({
            "questions": [mcq("Q1", "A"), mcq("Q2", "B"), mcq("Q3", "D")]
        }));
        let questions = generator
            .generate(Skill::Vocabulary, ProficiencyLevel::B1)
            .await
            .unwrap();

        let ids: Vec<&str> = questions.iter().map(Question::id).collect();
        assert_eq!(ids, ["vocabulary-B1-0", "vocabulary-B1-1", "vocabulary-B1-2"]);
        match &questions[2] {
            Question::MultipleChoice(q) => {
                let keys: Vec<&str> = q.options.iter().map(|o| o.id.as_str()).collect();
                assert_eq!(keys, ["A", "B", "C", "D"]);
                assert_eq!(q.correct_option_id, "D");
                assert_eq!(q.skill, Skill::Vocabulary);
            }
            other => panic!("expected MCQ, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prompt_carries_skill_constraints() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .withf(|req| {
                req.instructions.contains("describe an image")
                    && req.instructions.contains("CEFR A2")
                    && req.schema["properties"]["questions"]["type"] == "array"
            })
            .times(1)
            .returning(|_| Ok(json!({ "questions": [mcq("Q", "A")] }).to_string()));
        let generator = ContentGenerator::new(Arc::new(llm), AssessmentConfig::default());
        generator
            .generate(Skill::Vocabulary, ProficiencyLevel::A2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_code_fenced_response_is_accepted() {
        let body = format!("```json\n{}\n```", json!({ "questions": [mcq("Q", "C")] }));
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(move |_| Ok(body.clone()));
        let generator = ContentGenerator::new(Arc::new(llm), AssessmentConfig::default());
        let questions = generator
            .generate(Skill::Grammar, ProficiencyLevel::C1)
            .await
            .unwrap();
        assert_eq!(questions[0].id(), "grammar-C1-0");
    }

    #[tokio::test]
    async fn test_malformed_payloads_fail_the_whole_skill() {
        let cases = [
            json!({ "questions": [] }),
            json!({ "questions": [mcq("Q1", "A"), mcq("Q2", "Z")] }),
            json!({ "questions": [mcq("", "A")] }),
            json!({ "questions": [{ "questionText": "Q", "options": {}, "correctAnswerKey": "A" }] }),
            json!({ "items": [] }),
        ];
        for payload in cases {
            let generator = generator_returning(payload.clone());
            let err = generator
                .generate(Skill::Grammar, ProficiencyLevel::B1)
                .await
                .unwrap_err();
            assert!(
                matches!(err, AssessmentError::MalformedResponse { skill: Skill::Grammar, .. }),
                "payload {payload} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_non_json_is_malformed() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(|_| Ok("I cannot help with that".to_string()));
        let generator = ContentGenerator::new(Arc::new(llm), AssessmentConfig::default());
        let err = generator
            .generate(Skill::Writing, ProficiencyLevel::B1)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_provider_failure_is_generation_error() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .returning(|_| Err(anyhow::anyhow!("503 Service Unavailable")));
        let generator = ContentGenerator::new(Arc::new(llm), AssessmentConfig::default());
        let err = generator
            .generate(Skill::Speaking, ProficiencyLevel::B1)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Generation { skill: Skill::Speaking, .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_reading_task() {
        let generator = generator_returning(json!({
            "passage": "Tom lives in a small town.",
            "questions": [sub_mcq("Where does Tom live?", "A"), sub_mcq("Is it big?", "B")]
        }));
        let questions = generator
            .generate(Skill::Reading, ProficiencyLevel::B1)
            .await
            .unwrap();
        assert_eq!(questions.len(), 1);
        match &questions[0] {
            Question::ReadingTask(task) => {
                assert_eq!(task.id, "reading-comprehension-B1-0");
                assert_eq!(
                    task.prompt_text,
                    "Read the passage below and answer the questions that follow."
                );
                let ids: Vec<&str> = task.sub_questions.iter().map(|q| q.id.as_str()).collect();
                assert_eq!(ids, ["reading-comprehension-B1-0-0", "reading-comprehension-B1-0-1"]);
                assert_eq!(task.sub_questions[1].skill, Skill::Reading);
            }
            other => panic!("expected reading task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reading_prompt_uses_length_band() {
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .withf(|req| req.instructions.contains("240-300 words"))
            .returning(|_| {
                Ok(json!({ "passage": "p", "questions": [] }).to_string())
            });
        let generator = ContentGenerator::new(Arc::new(llm), AssessmentConfig::default());
        let questions = generator
            .generate(Skill::Reading, ProficiencyLevel::C2)
            .await
            .unwrap();
        match &questions[0] {
            Question::ReadingTask(task) => assert!(task.sub_questions.is_empty()),
            other => panic!("expected reading task, got {other:?}"),
        }
    }

    fn listening_payload(voice1: &str, voice2: &str, extra_speaker: Option<&str>) -> Value {
        let mut lines = vec![
            json!({ "speaker": "Sarah", "line": "Hi David!" }),
            json!({ "speaker": "David", "line": "Hi Sarah." }),
        ];
        if let Some(extra) = extra_speaker {
            lines.push(json!({ "speaker": extra, "line": "Excuse me." }));
        }
        json!({
            "dialogueTitle": "At the Station",
            "characterAssignment": {
                "character1_Name": "Sarah", "character1_TTSVoiceName": voice1,
                "character2_Name": "David", "character2_TTSVoiceName": voice2
            },
            "lines": lines,
            "questions": [sub_mcq("Who speaks first?", "A")]
        })
    }

    #[tokio::test]
    async fn test_listening_task_casts_pre_selected_voices() {
        let body = listening_payload("zephyr", "puck", None).to_string();
        let mut llm = MockLLMClient::new();
        llm.expect_generate_structured()
            .withf(|req| {
                req.instructions.contains("name 'zephyr'")
                    && req.instructions.contains("name 'puck'")
                    && req.schema["properties"]["characterAssignment"]["properties"]
                        ["character1_TTSVoiceName"]["enum"]
                        == json!(["zephyr"])
            })
            .times(1)
            .returning(move |_| Ok(body.clone()));
        let generator = ContentGenerator::new(Arc::new(llm), AssessmentConfig::default())
            .with_random_source(Box::new(FirstPick));

        let questions = generator
            .generate(Skill::Listening, ProficiencyLevel::B2)
            .await
            .unwrap();
        match &questions[0] {
            Question::ListeningTask(task) => {
                assert_eq!(task.id, "oral-comprehension-B2-0");
                assert_eq!(
                    task.prompt_text,
                    "Listen to the dialogue titled \"At the Station\" and answer the questions."
                );
                assert_eq!(task.speaker_voice_map["Sarah"], "zephyr");
                assert_eq!(task.speaker_voice_map["David"], "puck");
                assert_eq!(task.sub_questions[0].id, "oral-comprehension-B2-0-0");
            }
            other => panic!("expected listening task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_listening_voice_outside_cast_is_replaced() {
        let generator = generator_returning(listening_payload("charon", "PUCK", None));
        let questions = generator
            .generate(Skill::Listening, ProficiencyLevel::B1)
            .await
            .unwrap();
        let Question::ListeningTask(task) = &questions[0] else {
            panic!("expected listening task");
        };
        assert_eq!(task.speaker_voice_map["Sarah"], "zephyr");
        assert_eq!(task.speaker_voice_map["David"], "puck");
    }

    #[test]
    fn test_unassigned_speaker_falls_back_to_free_cast_voice() {
        let cast = [
            VoiceProfile {
                name: "kore",
                gender: VoiceGender::Female,
                style: "Firm",
            },
            VoiceProfile {
                name: "orus",
                gender: VoiceGender::Male,
                style: "Firm",
            },
        ];
        // Both characters share a name, leaving the second cast voice free.
        let assignment = CharacterAssignment {
            character1_name: "Ana".into(),
            character1_voice: "kore".into(),
            character2_name: "Ana".into(),
            character2_voice: "orus".into(),
        };
        let lines = vec![
            DialogueLine {
                speaker: "Ana".into(),
                line: "Hello".into(),
            },
            DialogueLine {
                speaker: "Ben".into(),
                line: "Hi".into(),
            },
            DialogueLine {
                speaker: "Cid".into(),
                line: "Hey".into(),
            },
        ];
        let map = assign_speaker_voices(&assignment, &lines, cast);
        assert_eq!(map["Ana"], "kore");
        assert_eq!(map["Ben"], "orus");
        // Every cast voice is taken, so the first one is reused.
        assert_eq!(map["Cid"], "kore");
    }

    #[tokio::test]
    async fn test_listening_without_lines_is_malformed() {
        let mut payload = listening_payload("zephyr", "puck", None);
        payload["lines"] = json!([]);
        let generator = generator_returning(payload);
        let err = generator
            .generate(Skill::Listening, ProficiencyLevel::B1)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::MalformedResponse { skill: Skill::Listening, .. }));
    }

    #[tokio::test]
    async fn test_listening_without_title() {
        let mut payload = listening_payload("zephyr", "puck", Some("Guard"));
        payload["dialogueTitle"] = Value::Null;
        let generator = generator_returning(payload);
        let questions = generator
            .generate(Skill::Listening, ProficiencyLevel::A1)
            .await
            .unwrap();
        let Question::ListeningTask(task) = &questions[0] else {
            panic!("expected listening task");
        };
        assert_eq!(task.prompt_text, "Listen to the dialogue and answer the questions.");
        assert!(task.dialogue_title.is_none());
        assert_eq!(task.speaker_voice_map.len(), 3);
        assert_eq!(task.dialogue_lines.len(), 3);
    }

    #[tokio::test]
    async fn test_writing_and_speaking_prompts() {
        let generator = generator_returning(json!({
            "prompt": "Describe your last holiday.",
            "taskDescription": "Write an email to a friend."
        }));
        let questions = generator
            .generate(Skill::Writing, ProficiencyLevel::B1)
            .await
            .unwrap();
        match &questions[0] {
            Question::WritingTask(task) => {
                assert_eq!(task.id, "writing-B1-0");
                assert_eq!(task.prompt_text, "Describe your last holiday.");
                assert_eq!(task.task_description.as_deref(), Some("Write an email to a friend."));
            }
            other => panic!("expected writing task, got {other:?}"),
        }

        let generator = generator_returning(json!({ "prompt": "Talk about your hometown." }));
        let questions = generator
            .generate(Skill::Speaking, ProficiencyLevel::C1)
            .await
            .unwrap();
        match &questions[0] {
            Question::SpeakingTask(task) => {
                assert_eq!(task.id, "speaking-C1-0");
                assert!(task.task_description.is_none());
            }
            other => panic!("expected speaking task, got {other:?}"),
        }
    }

    #[test]
    fn test_length_bands() {
        assert_eq!(reading_length_band(ProficiencyLevel::A1), "80-120 words");
        assert_eq!(reading_length_band(ProficiencyLevel::B2), "180-240 words");
        assert_eq!(writing_length_band(ProficiencyLevel::C2), "150-200 words");
        assert_eq!(speaking_length_band(ProficiencyLevel::A2), "30-60 seconds");
        assert_eq!(speaking_length_band(ProficiencyLevel::C1), "2-3 minutes");
    }
}
