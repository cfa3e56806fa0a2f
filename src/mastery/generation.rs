use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationPurpose {
    ChunkSummary,
    MergeSummary,
    Title,
    Quiz,
    Explanation,
}

impl GenerationPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationPurpose::ChunkSummary => "chunk_summary",
            GenerationPurpose::MergeSummary => "merge_summary",
            GenerationPurpose::Title => "title",
            GenerationPurpose::Quiz => "quiz",
            GenerationPurpose::Explanation => "explanation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_words: Option<usize>,
    pub json_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub purpose: GenerationPurpose,
    pub system: String,
    pub prompt: String,
    pub constraints: GenerationConstraints,
}

/// Opaque text-in/text-out capability used for summaries, quizzes and explanations.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<String>;
}

/// Runs `fut` under an optional deadline; an elapsed deadline becomes a `Generation` error.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, what: &str, fut: F) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::generation(format!(
                "{what} timed out after {}ms",
                limit.as_millis()
            ))),
        },
        None => fut.await,
    }
}
