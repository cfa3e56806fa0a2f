#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt;

use mastery_backend::core::EventBus;
use mastery_backend::mastery::{
    ContentSource, GenerationPurpose, GenerationRequest, MasteryEngine, PipelineConfig,
    PipelineError, PipelineResult, TextGenerator,
};
use mastery_backend::state::AppState;

pub const LEARNER: &str = "learner-1";

pub async fn create_test_app() -> Router {
    std::env::set_var("APP_ENV", "test");
    std::env::remove_var("EVENT_STORE_URL");

    mastery_backend::create_app().await
}

/// Generator with fixed answers per purpose. Quiz items always have "A" as the correct
/// option, so an all-"A" submission scores 1.0 and an all-"B" submission scores 0.0.
#[derive(Default)]
pub struct FakeGenerator {
    quiz_failures: AtomicUsize,
    calls: Mutex<HashMap<GenerationPurpose, usize>>,
}

impl FakeGenerator {
    /// Fails the next `n` quiz generations.
    pub fn fail_quizzes(&self, n: usize) {
        self.quiz_failures.store(n, Ordering::SeqCst);
    }

    pub fn calls_for(&self, purpose: GenerationPurpose) -> usize {
        self.calls.lock().get(&purpose).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PipelineResult<String> {
        *self.calls.lock().entry(request.purpose).or_default() += 1;

        match request.purpose {
            GenerationPurpose::ChunkSummary | GenerationPurpose::MergeSummary => {
                let tier = request
                    .system
                    .lines()
                    .find_map(|line| line.strip_prefix("Notes tier: "))
                    .unwrap_or("unknown");
                Ok(format!("- key points written for the {tier} tier"))
            }
            GenerationPurpose::Title => Ok("Photosynthesis Basics".to_string()),
            GenerationPurpose::Quiz => {
                let failing = self
                    .quiz_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(PipelineError::Generation("quiz service offline".into()));
                }
                Ok(quiz_json(requested_count(&request.prompt)))
            }
            GenerationPurpose::Explanation => {
                Ok("Review how light energy becomes chemical energy.".to_string())
            }
        }
    }
}

fn requested_count(prompt: &str) -> usize {
    prompt
        .strip_prefix("Create ")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(5)
}

pub fn quiz_json(count: usize) -> String {
    let items: Vec<Value> = (0..count)
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
    format!("```json\n{}\n```", Value::Array(items))
}

/// Transcript lookup keyed by the reference the engine passes through.
#[derive(Default)]
pub struct FakeSource {
    transcripts: HashMap<String, String>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn with(mut self, reference: &str, transcript: &str) -> Self {
        self.transcripts
            .insert(reference.to_string(), transcript.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn resolve(&self, source_ref: &str) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts
            .get(source_ref)
            .cloned()
            .ok_or_else(|| PipelineError::SourceUnavailable(source_ref.to_string()))
    }
}

pub struct TestApp {
    pub router: Router,
    pub generator: Arc<FakeGenerator>,
    pub source: Arc<FakeSource>,
    pub events: Arc<EventBus>,
}

pub fn scripted_app() -> TestApp {
    scripted_app_with(FakeSource::default())
}

pub fn scripted_app_with(source: FakeSource) -> TestApp {
    let generator = Arc::new(FakeGenerator::default());
    let source = Arc::new(source);
    let events = Arc::new(EventBus::new());
    let engine = MasteryEngine::new(
        PipelineConfig::default(),
        Arc::clone(&generator) as Arc<dyn TextGenerator>,
        Arc::clone(&source) as Arc<dyn ContentSource>,
        Arc::clone(&events),
    );
    let state = AppState::new(Arc::new(engine), None);

    TestApp {
        router: mastery_backend::app(state),
        generator,
        source,
        events,
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str, learner: Option<&str>) -> (StatusCode, Value) {
        send(&self.router, Method::GET, uri, learner, None).await
    }

    pub async fn post(&self, uri: &str, learner: Option<&str>, body: Value) -> (StatusCode, Value) {
        send(&self.router, Method::POST, uri, learner, Some(body)).await
    }

    /// Starts a session over fixed text and returns its id.
    pub async fn start_session(&self, learner: &str) -> String {
        let (status, body) = self
            .post(
                "/api/sessions",
                Some(learner),
                serde_json::json!({
                    "text": "Plants convert light into chemical energy using chlorophyll.",
                    "topic": "Photosynthesis"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "unexpected body: {body}");
        body["data"]["id"]
            .as_str()
            .expect("session id")
            .to_string()
    }
}

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    learner: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(learner) = learner {
        builder = builder.header("x-learner-id", learner);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
