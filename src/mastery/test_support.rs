use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::{PipelineError, PipelineResult};
use super::generation::{GenerationPurpose, GenerationRequest, TextGenerator};
use super::source::ContentSource;

type Handler = dyn Fn(&GenerationRequest) -> PipelineResult<String> + Send + Sync;

/// Deterministic generator that answers by purpose and records every request.
pub struct ScriptedGenerator {
    handler: Box<Handler>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&GenerationRequest) -> PipelineResult<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn standard() -> Arc<Self> {
        Self::new(default_response)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, purpose: GenerationPurpose) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        (self.handler)(request)
    }
}

/// Tier label the summarizer embeds in its system prompt.
pub fn tier_marker(request: &GenerationRequest) -> String {
    request
        .system
        .lines()
        .find_map(|line| line.strip_prefix("Notes tier: "))
        .unwrap_or("unknown")
        .to_string()
}

pub fn quiz_json(count: usize) -> String {
    let items: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            serde_json::json!({
                "type": "mcq",
                "question": format!("Question {}?", i + 1),
                "options": ["A", "B", "C", "D"],
                "correct_answer": "A",
                "topic": "Chlorophyll"
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

pub fn default_response(request: &GenerationRequest) -> PipelineResult<String> {
    Ok(match request.purpose {
        GenerationPurpose::ChunkSummary | GenerationPurpose::MergeSummary => {
            format!("- {} notes", tier_marker(request))
        }
        GenerationPurpose::Title => "Photosynthesis Basics".to_string(),
        GenerationPurpose::Quiz => quiz_json(10),
        GenerationPurpose::Explanation => "Revisit the key idea with a worked example.".to_string(),
    })
}

/// Content source backed by a fixed map of references to transcripts.
#[derive(Default)]
pub struct StaticSource {
    transcripts: HashMap<String, PipelineResult<String>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn with(mut self, reference: &str, result: PipelineResult<String>) -> Self {
        self.transcripts.insert(reference.to_string(), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    async fn resolve(&self, source_ref: &str) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts
            .get(source_ref)
            .cloned()
            .unwrap_or_else(|| Err(PipelineError::SourceUnavailable(source_ref.to_string())))
    }
}
