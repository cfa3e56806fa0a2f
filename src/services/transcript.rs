use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::mastery::{ContentSource, PipelineError, PipelineResult};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("transcript source not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("source rejected reference ({status})")]
    Rejected { status: reqwest::StatusCode },
    #[error("transcript service returned HTTP {status}")]
    Upstream { status: reqwest::StatusCode },
    #[error("no transcript text")]
    Empty,
}

impl TranscriptError {
    fn into_pipeline(self, reference: &str) -> PipelineError {
        match self {
            TranscriptError::Empty => PipelineError::NoTranscript(reference.to_string()),
            other => PipelineError::SourceUnavailable(format!("{reference}: {other}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TranscriptBody {
    Text { transcript: String },
    Segments { segments: Vec<TranscriptSegment> },
}

#[derive(Debug, Deserialize)]
struct TranscriptSegment {
    text: String,
}

impl TranscriptBody {
    fn into_text(self) -> String {
        match self {
            TranscriptBody::Text { transcript } => transcript,
            TranscriptBody::Segments { segments } => segments
                .into_iter()
                .map(|s| s.text)
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Resolves media references through an HTTP transcript service
/// (`GET {endpoint}?source=<reference>`).
#[derive(Clone)]
pub struct HttpTranscriptSource {
    endpoint: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTranscriptSource {
    pub fn from_env() -> Self {
        let endpoint = std::env::var("TRANSCRIPT_API_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let api_key = std::env::var("TRANSCRIPT_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self::new(endpoint, api_key)
    }

    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint,
            api_key,
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn fetch(&self, reference: &str) -> Result<String, TranscriptError> {
        let endpoint = self.endpoint.as_deref().ok_or(TranscriptError::NotConfigured)?;

        let mut request = self.client.get(endpoint).query(&[("source", reference)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Err(TranscriptError::Empty);
        }
        if is_rejection(status) {
            return Err(TranscriptError::Rejected { status });
        }
        if !status.is_success() {
            return Err(TranscriptError::Upstream { status });
        }

        let body = resp.text().await?;
        let text = parse_transcript(&body);
        if text.trim().is_empty() {
            return Err(TranscriptError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl ContentSource for HttpTranscriptSource {
    async fn resolve(&self, source_ref: &str) -> PipelineResult<String> {
        match self.fetch(source_ref).await {
            Ok(text) => {
                debug!(source = %source_ref, chars = text.len(), "transcript resolved");
                Ok(text)
            }
            Err(err) => {
                warn!(source = %source_ref, error = %err, "transcript resolution failed");
                Err(err.into_pipeline(source_ref))
            }
        }
    }
}

fn is_rejection(status: reqwest::StatusCode) -> bool {
    matches!(
        status,
        reqwest::StatusCode::BAD_REQUEST
            | reqwest::StatusCode::FORBIDDEN
            | reqwest::StatusCode::NOT_FOUND
            | reqwest::StatusCode::GONE
            | reqwest::StatusCode::UNPROCESSABLE_ENTITY
    )
}

/// Accepts `{"transcript": ".."}`, `{"segments": [{"text": ..}]}` or plain text.
fn parse_transcript(body: &str) -> String {
    match serde_json::from_str::<TranscriptBody>(body) {
        Ok(parsed) => parsed.into_text(),
        Err(_) if body.trim_start().starts_with(['{', '[']) => String::new(),
        Err(_) => body.to_string(),
    }
}
