use async_trait::async_trait;

use super::error::PipelineResult;

/// Resolves a media reference into raw transcript text.
///
/// Implementations report `SourceUnavailable` for private, removed or invalid references
/// and `NoTranscript` when the source exists but has no extractable text.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn resolve(&self, source_ref: &str) -> PipelineResult<String>;
}
