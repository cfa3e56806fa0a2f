use std::time::Duration;

use serde::Serialize;

/// Score at or above which a quiz attempt counts as mastery. Product requirement, not tunable.
pub const MASTERY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryConfig {
    pub chunk_size: usize,
    pub max_parallel: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            max_parallel: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizConfig {
    pub min_requested: usize,
    pub max_items: usize,
    pub min_valid_items: usize,
    pub max_options: usize,
}

impl QuizConfig {
    /// Reconciles bounds read independently so that
    /// `min_valid_items <= max_items` and `min_requested <= max_items`.
    pub fn reconciled(mut self) -> Self {
        self.min_requested = self.min_requested.max(1);
        self.max_items = self.max_items.max(self.min_requested);
        self.min_valid_items = self.min_valid_items.clamp(1, self.max_items);
        self.max_options = self.max_options.max(2);
        self
    }
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            min_requested: 5,
            max_items: 10,
            min_valid_items: 3,
            max_options: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsPolicy {
    pub base: u32,
    pub per_correct: u32,
}

impl PointsPolicy {
    pub fn award(&self, correct_count: usize) -> u32 {
        let correct = u32::try_from(correct_count).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.per_correct.saturating_mul(correct))
    }
}

impl Default for PointsPolicy {
    fn default() -> Self {
        Self {
            base: 1,
            per_correct: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub summary: SummaryConfig,
    pub quiz: QuizConfig,
    pub points: PointsPolicy,
    #[serde(skip)]
    pub generation_timeout: Option<Duration>,
    pub weak_area_window: usize,
    pub max_weak_area_window: usize,
    pub text_points: u32,
    pub media_points: u32,
    /// How long a finished or idle session stays readable before it is evicted.
    #[serde(skip)]
    pub session_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summary: SummaryConfig::default(),
            quiz: QuizConfig::default(),
            points: PointsPolicy::default(),
            generation_timeout: Some(Duration::from_millis(60_000)),
            weak_area_window: 10,
            max_weak_area_window: 200,
            text_points: 1,
            media_points: 2,
            session_retention: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("SUMMARY_CHUNK_SIZE").filter(|v| *v >= 200) {
            config.summary.chunk_size = v;
        }
        if let Some(v) = env_usize("SUMMARY_MAX_PARALLEL").filter(|v| *v > 0) {
            config.summary.max_parallel = v;
        }
        if let Some(v) = env_usize("QUIZ_MIN_ITEMS_REQUESTED") {
            config.quiz.min_requested = v;
        }
        if let Some(v) = env_usize("QUIZ_MAX_ITEMS") {
            config.quiz.max_items = v;
        }
        if let Some(v) = env_usize("QUIZ_MIN_VALID_ITEMS") {
            config.quiz.min_valid_items = v;
        }
        if let Some(v) = env_usize("QUIZ_MAX_OPTIONS") {
            config.quiz.max_options = v;
        }
        config.quiz = config.quiz.reconciled();
        if let Some(ms) = env_usize("GENERATION_TIMEOUT_MS") {
            config.generation_timeout = (ms > 0).then(|| Duration::from_millis(ms as u64));
        }
        if let Some(v) = env_usize("POINTS_BASE") {
            config.points.base = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = env_usize("POINTS_PER_CORRECT") {
            config.points.per_correct = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = env_usize("WEAK_AREA_WINDOW").filter(|v| *v > 0) {
            config.weak_area_window = v.min(config.max_weak_area_window);
        }
        if let Some(secs) = env_usize("SESSION_RETENTION_SECS") {
            config.session_retention = Duration::from_secs(secs as u64);
        }

        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())?
        .trim()
        .parse()
        .ok()
}
