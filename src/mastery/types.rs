use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Difficulty tier for generated notes, ordered from most to least complex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    #[default]
    Standard,
    Simplified,
    MostSimplified,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Standard, Tier::Simplified, Tier::MostSimplified];

    /// The next easier tier, or `None` when this is already the easiest one.
    pub fn next_lower(self) -> Option<Tier> {
        match self {
            Tier::Standard => Some(Tier::Simplified),
            Tier::Simplified => Some(Tier::MostSimplified),
            Tier::MostSimplified => None,
        }
    }

    pub fn is_lowest(self) -> bool {
        self.next_lower().is_none()
    }

    /// Position in the difficulty ordering; 0 is the hardest tier.
    pub fn rank(self) -> usize {
        match self {
            Tier::Standard => 0,
            Tier::Simplified => 1,
            Tier::MostSimplified => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Simplified => "simplified",
            Tier::MostSimplified => "mostSimplified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "standard" => Some(Tier::Standard),
            "simplified" => Some(Tier::Simplified),
            "mostsimplified" => Some(Tier::MostSimplified),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identifier of normalized content (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the learner handed to the pipeline: free text or a media reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ContentInput {
    Text(String),
    Media(String),
}

impl ContentInput {
    pub fn is_media(&self) -> bool {
        matches!(self, ContentInput::Media(_))
    }
}

/// Output of the tiered summarizer before it is sealed into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedNotes {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesArtifact {
    pub fingerprint: ContentFingerprint,
    pub tier: Tier,
    pub title: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuizItemKind {
    #[serde(rename = "multipleChoice")]
    MultipleChoice,
    #[serde(rename = "trueFalse")]
    TrueFalse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItem {
    pub question: String,
    pub kind: QuizItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub correct_answer: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtopic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: Uuid,
    pub fingerprint: ContentFingerprint,
    pub tier: Tier,
    pub topic: String,
    pub items: Vec<QuizItem>,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Learner-facing copy with the answer key removed.
    pub fn public_view(&self) -> QuizView {
        QuizView {
            id: self.id,
            tier: self.tier,
            topic: self.topic.clone(),
            items: self
                .items
                .iter()
                .map(|item| QuizItemView {
                    question: item.question.clone(),
                    kind: item.kind,
                    options: item.options.clone(),
                    topic: item.topic.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub id: Uuid,
    pub tier: Tier,
    pub topic: String,
    pub items: Vec<QuizItemView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItemView {
    pub question: String,
    pub kind: QuizItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub topic: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub id: Uuid,
    pub quiz_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub learner_id: String,
    pub topic: String,
    pub tier: Tier,
    pub submitted_answers: Vec<Option<String>>,
    pub item_results: Vec<ItemResult>,
    pub correct_count: usize,
    pub total: usize,
    pub score: f64,
    pub points_awarded: u32,
    pub submitted_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn incorrect_topics(&self) -> impl Iterator<Item = &str> {
        self.item_results
            .iter()
            .filter(|r| !r.correct)
            .map(|r| r.topic.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Building,
    AwaitingAttempt,
    Evaluating,
    Retrying,
    Mastered,
    TierExhausted,
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Mastered | SessionState::TierExhausted | SessionState::Abandoned
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Building => "building",
            SessionState::AwaitingAttempt => "awaitingAttempt",
            SessionState::Evaluating => "evaluating",
            SessionState::Retrying => "retrying",
            SessionState::Mastered => "mastered",
            SessionState::TierExhausted => "tierExhausted",
            SessionState::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NextAction {
    Done,
    RetryWithSimplerNotes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakAreaEntry {
    pub topic: String,
    pub incorrect_count: usize,
    pub last_incorrect_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Result of `process_content`.
#[derive(Debug, Clone)]
pub struct ProcessedContent {
    pub notes: Arc<NotesArtifact>,
    pub quiz: Quiz,
    pub was_cache_hit: bool,
}
