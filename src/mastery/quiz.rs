use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::QuizConfig;
use super::error::{PipelineError, PipelineResult};
use super::generation::{
    with_deadline, GenerationConstraints, GenerationPurpose, GenerationRequest, TextGenerator,
};
use super::types::{ContentFingerprint, Quiz, QuizItem, QuizItemKind, Tier};

const DEFAULT_TOPIC: &str = "General";

/// Turns notes into a validated quiz. Untyped generator output never leaves this module:
/// every item is either normalized into a `QuizItem` or dropped.
pub struct QuizBuilder {
    generator: Arc<dyn TextGenerator>,
    config: QuizConfig,
    timeout: Option<Duration>,
}

impl QuizBuilder {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        config: QuizConfig,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            generator,
            config,
            timeout,
        }
    }

    pub fn config(&self) -> &QuizConfig {
        &self.config
    }

    /// Number of items to ask for, clamped to the configured range. A minimum above the
    /// maximum wins rather than panicking.
    pub fn requested_count(&self, requested: Option<usize>) -> usize {
        let low = self.config.min_requested.max(1);
        let high = self.config.max_items.max(low);
        requested.unwrap_or(high).clamp(low, high)
    }

    pub async fn build(
        &self,
        notes_text: &str,
        topic: &str,
        fingerprint: &ContentFingerprint,
        tier: Tier,
        requested: Option<usize>,
    ) -> PipelineResult<Quiz> {
        let notes_text = notes_text.trim();
        if notes_text.is_empty() {
            return Err(PipelineError::invalid_input("cannot build a quiz from empty notes"));
        }
        let topic = quiz_topic(topic);
        let count = self.requested_count(requested);

        let request = GenerationRequest {
            purpose: GenerationPurpose::Quiz,
            system: "You write short assessments for study notes. Respond with JSON only."
                .to_string(),
            prompt: quiz_prompt(notes_text, &topic, count),
            constraints: GenerationConstraints {
                max_words: None,
                json_output: true,
            },
        };
        let raw = with_deadline(self.timeout, "quiz generation", self.generator.generate(&request))
            .await?;

        let items = parse_quiz_items(&raw, &topic, &self.config)?;
        debug!(
            fingerprint = %fingerprint.short(),
            %tier,
            topic = %topic,
            items = items.len(),
            "quiz built"
        );

        Ok(Quiz {
            id: Uuid::new_v4(),
            fingerprint: fingerprint.clone(),
            tier,
            topic,
            items,
            created_at: Utc::now(),
        })
    }
}

fn quiz_topic(topic: &str) -> String {
    let topic = topic.split_whitespace().collect::<Vec<_>>().join(" ");
    if topic.is_empty() {
        DEFAULT_TOPIC.to_string()
    } else {
        topic
    }
}

fn quiz_prompt(notes_text: &str, topic: &str, count: usize) -> String {
    format!(
        "Create {count} quiz questions about \"{topic}\" from the notes below. Mix multiple-choice \
         and true/false questions.\n\
         Return a JSON array. Each element has the fields:\n\
         - \"question\": the question text\n\
         - \"type\": \"mcq\" or \"true_false\"\n\
         - \"options\": 4 answer strings for mcq, omit for true_false\n\
         - \"correct_answer\": the exact text of the correct option, or \"True\"/\"False\"\n\
         - \"topic\": the sub-topic the question tests\n\n\
         [Notes]\n{notes_text}"
    )
}

/// Parses and validates generator output into at most `max_items` items.
pub fn parse_quiz_items(
    raw: &str,
    topic: &str,
    config: &QuizConfig,
) -> PipelineResult<Vec<QuizItem>> {
    let values = extract_item_values(raw).ok_or_else(|| {
        PipelineError::generation("quiz generator did not return a JSON array of questions")
    })?;

    let received = values.len();
    let mut items: Vec<QuizItem> = values
        .iter()
        .filter_map(|value| normalize_item(value, topic, config.max_options))
        .collect();

    let dropped = received - items.len();
    if dropped > 0 {
        warn!(received, dropped, topic = %topic, "dropped malformed quiz items");
    }
    if items.len() < config.min_valid_items {
        return Err(PipelineError::InsufficientQuizItems {
            valid: items.len(),
            required: config.min_valid_items,
        });
    }
    items.truncate(config.max_items);
    Ok(items)
}

fn extract_item_values(raw: &str) -> Option<Vec<Value>> {
    let cleaned = strip_think_tags(raw);
    let content = extract_json_content(&cleaned);

    if let Ok(value) = serde_json::from_str::<Value>(content) {
        if let Some(items) = item_array(value) {
            return Some(items);
        }
    }

    let start = content.find('[')?;
    let end = content.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&content[start..=end])
        .ok()
        .and_then(item_array)
}

fn item_array(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => ["questions", "items", "quiz"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
}

fn strip_think_tags(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("<think>") {
        match result.find("</think>") {
            Some(end) if end > start => {
                result.replace_range(start..end + "</think>".len(), "");
            }
            _ => break,
        }
    }
    result
}

fn extract_json_content(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(fence) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[fence + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn normalize_item(value: &Value, topic: &str, max_options: usize) -> Option<QuizItem> {
    let obj = value.as_object()?;
    let question = text_field(obj, &["question", "q", "prompt"])?;
    let answer = answer_field(obj)?;
    let options = options_field(obj);

    let kind = match obj
        .get("type")
        .or_else(|| obj.get("kind"))
        .and_then(Value::as_str)
    {
        Some(kind) => parse_kind(kind)?,
        None if options.as_ref().is_some_and(|o| o.len() >= 2) => QuizItemKind::MultipleChoice,
        None => QuizItemKind::TrueFalse,
    };

    let (options, correct_answer) = match kind {
        QuizItemKind::MultipleChoice => {
            let (options, correct) = normalize_options(options?, &answer, max_options)?;
            (Some(options), correct)
        }
        QuizItemKind::TrueFalse => (None, normalize_true_false(&answer)?.to_string()),
    };

    let subtopic = text_field(obj, &["topic", "subtopic"])
        .filter(|label| !label.eq_ignore_ascii_case(topic));

    Some(QuizItem {
        question,
        kind,
        options,
        correct_answer,
        topic: topic.to_string(),
        subtopic,
    })
}

fn text_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find_map(|v| v.as_str())
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

fn answer_field(obj: &serde_json::Map<String, Value>) -> Option<String> {
    let value = ["correct_answer", "correctAnswer", "answer"]
        .iter()
        .find_map(|key| obj.get(*key))?;
    let answer = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!answer.is_empty()).then_some(answer)
}

fn options_field(obj: &serde_json::Map<String, Value>) -> Option<Vec<String>> {
    let values = obj
        .get("options")
        .or_else(|| obj.get("choices"))?
        .as_array()?;
    Some(
        values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

fn parse_kind(kind: &str) -> Option<QuizItemKind> {
    let key: String = kind
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match key.as_str() {
        "mcq" | "mc" | "multiplechoice" | "choice" => Some(QuizItemKind::MultipleChoice),
        "truefalse" | "tf" | "boolean" | "bool" => Some(QuizItemKind::TrueFalse),
        _ => None,
    }
}

/// De-duplicates and caps options, keeping the correct answer. Returns the options and the
/// canonical spelling of the answer, or `None` when the item cannot be salvaged.
fn normalize_options(
    options: Vec<String>,
    answer: &str,
    max_options: usize,
) -> Option<(Vec<String>, String)> {
    let mut unique: Vec<String> = Vec::with_capacity(options.len());
    for option in options {
        if !unique.iter().any(|u| u.eq_ignore_ascii_case(&option)) {
            unique.push(option);
        }
    }
    if unique.len() < 2 {
        return None;
    }

    let correct_index = unique
        .iter()
        .position(|o| o.eq_ignore_ascii_case(answer))
        .or_else(|| letter_index(answer).filter(|&i| i < unique.len()))?;
    let correct = unique[correct_index].clone();

    let cap = max_options.max(2);
    if unique.len() > cap {
        unique.truncate(cap);
        if correct_index >= cap {
            unique[cap - 1] = correct.clone();
        }
    }
    Some((unique, correct))
}

/// Maps a bare option letter ("B", "b)", "(c)") to an index.
fn letter_index(answer: &str) -> Option<usize> {
    let letters: Vec<char> = answer
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '.' | ' '))
        .collect();
    match letters.as_slice() {
        [c] if c.is_ascii_alphabetic() => Some((c.to_ascii_uppercase() as u8 - b'A') as usize),
        _ => None,
    }
}

fn normalize_true_false(answer: &str) -> Option<&'static str> {
    match answer.trim().trim_end_matches('.').to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" => Some("True"),
        "false" | "f" | "no" => Some("False"),
        _ => None,
    }
}
