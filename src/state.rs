use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::config::Config;
use crate::core::EventBus;
use crate::db::EventStore;
use crate::mastery::{ContentSource, MasteryEngine, TextGenerator};
use crate::services::{HttpTranscriptSource, LLMProvider};

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    engine: Arc<MasteryEngine>,
    event_store: Option<Arc<EventStore>>,
    generator_available: bool,
}

impl AppState {
    pub fn new(engine: Arc<MasteryEngine>, event_store: Option<Arc<EventStore>>) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            engine,
            event_store,
            generator_available: true,
        }
    }

    pub fn with_generator_available(mut self, available: bool) -> Self {
        self.generator_available = available;
        self
    }

    /// Engine backed by the configured LLM provider and transcript service.
    pub fn create_engine(config: &Config, events: Arc<EventBus>) -> (Arc<MasteryEngine>, bool) {
        let provider = LLMProvider::from_env();
        let available = provider.is_available();
        if !available {
            tracing::warn!("LLM_API_KEY not set, generation requests will fail");
        }
        let generator: Arc<dyn TextGenerator> = Arc::new(provider);
        let source: Arc<dyn ContentSource> = Arc::new(HttpTranscriptSource::from_env());
        let engine = MasteryEngine::new(config.pipeline.clone(), generator, source, events);
        (Arc::new(engine), available)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn engine(&self) -> Arc<MasteryEngine> {
        Arc::clone(&self.engine)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(self.engine.events())
    }

    pub fn event_store(&self) -> Option<Arc<EventStore>> {
        self.event_store.clone()
    }

    pub fn generator_available(&self) -> bool {
        self.generator_available
    }
}
