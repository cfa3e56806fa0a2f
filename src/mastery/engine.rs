//! Orchestrates the pipeline: fingerprint, cached tiered notes, quiz, scoring and the
//! per-session mastery loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::cache::{CacheLookup, CacheStats, ContentCache};
use super::config::{PipelineConfig, MASTERY_THRESHOLD};
use super::error::{PipelineError, PipelineResult};
use super::fingerprint::fingerprint;
use super::generation::TextGenerator;
use super::quiz::QuizBuilder;
use super::scorer::{self, AttemptContext};
use super::session::{BuildTicket, Decision, MasterySession, SessionErrorView, SessionSnapshot};
use super::source::ContentSource;
use super::summarizer::TieredSummarizer;
use super::types::{
    AttemptRecord, ContentFingerprint, ContentInput, ItemResult, NextAction, NotesArtifact,
    ProcessedContent, Quiz, QuizView, SessionState, Tier, WeakAreaEntry,
};
use super::weak_areas::WeakAreaAggregator;
use crate::core::{
    AttemptScoredPayload, EventBus, NotesProducedPayload, PipelineEvent, QuizBuiltPayload,
    SessionCompletedPayload, SessionStartedPayload, TierDowngradedPayload,
};

const MAX_LEARNER_ID_LEN: usize = 128;

struct SessionSlot {
    learner_id: String,
    topic_key: String,
    session: Arc<Mutex<MasterySession>>,
}

/// A quiz handed out without a session, kept so its answers can be scored later.
struct IssuedQuiz {
    learner_id: String,
    quiz: Arc<Quiz>,
    issued_at: DateTime<Utc>,
}

/// Result of `score_quiz`. Sessionless quizzes already expose their answer key, so the
/// per-item results are returned as well.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttemptOutcome {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub score: f64,
    pub correct_count: usize,
    pub total: usize,
    pub points_awarded: u32,
    pub mastered: bool,
    pub item_results: Vec<ItemResult>,
}

impl From<&AttemptRecord> for QuizAttemptOutcome {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            attempt_id: record.id,
            quiz_id: record.quiz_id,
            score: record.score,
            correct_count: record.correct_count,
            total: record.total,
            points_awarded: record.points_awarded,
            mastered: record.score >= MASTERY_THRESHOLD,
            item_results: record.item_results.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    pub sessions: usize,
    pub quizzes: usize,
}

/// Result of `submit_attempt`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub attempt_id: Uuid,
    pub score: f64,
    pub correct_count: usize,
    pub total: usize,
    pub points_awarded: u32,
    pub session_state: SessionState,
    pub tier: Tier,
    pub next_action: NextAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_notes: Option<NotesArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_quiz: Option<QuizView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_error: Option<SessionErrorView>,
}

pub struct MasteryEngine {
    config: PipelineConfig,
    source: Arc<dyn ContentSource>,
    cache: ContentCache,
    summarizer: TieredSummarizer,
    quizzes: QuizBuilder,
    weak_areas: WeakAreaAggregator,
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
    issued_quizzes: RwLock<HashMap<Uuid, IssuedQuiz>>,
    events: Arc<EventBus>,
}

impl MasteryEngine {
    pub fn new(
        config: PipelineConfig,
        generator: Arc<dyn TextGenerator>,
        source: Arc<dyn ContentSource>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            cache: ContentCache::new(config.generation_timeout),
            summarizer: TieredSummarizer::new(Arc::clone(&generator), config.summary.clone()),
            quizzes: QuizBuilder::new(
                Arc::clone(&generator),
                config.quiz.clone(),
                config.generation_timeout,
            ),
            weak_areas: WeakAreaAggregator::new(generator, config.generation_timeout),
            sessions: RwLock::new(HashMap::new()),
            issued_quizzes: RwLock::new(HashMap::new()),
            config,
            source,
            events,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn issued_quiz_count(&self) -> usize {
        self.issued_quizzes.read().len()
    }

    /// Notes and a fresh quiz for the input at `tier`, outside of any session.
    pub async fn process_content(
        &self,
        learner_id: &str,
        input: ContentInput,
        tier: Tier,
    ) -> PipelineResult<ProcessedContent> {
        validate_learner(learner_id)?;
        let fp = fingerprint(&input)?;

        let lookup = self.notes_for(&input, &fp, tier).await?;
        let topic = topic_from_title(&lookup.artifact.title);
        let quiz = self
            .quizzes
            .build(&lookup.artifact.text, &topic, &fp, tier, None)
            .await?;

        let points = if input.is_media() {
            self.config.media_points
        } else {
            self.config.text_points
        };
        self.publish_notes(learner_id, None, &lookup, points).await;
        self.publish_quiz(learner_id, None, &quiz).await;
        self.issue_quiz(learner_id, &quiz);

        info!(
            learner_id = %learner_id,
            fingerprint = %fp.short(),
            %tier,
            cache_hit = lookup.was_cache_hit,
            items = quiz.len(),
            "content processed"
        );

        Ok(ProcessedContent {
            notes: lookup.artifact,
            quiz,
            was_cache_hit: lookup.was_cache_hit,
        })
    }

    /// Standalone quiz over caller-supplied text.
    pub async fn generate_quiz(
        &self,
        learner_id: &str,
        text: &str,
        topic: &str,
        count: Option<usize>,
    ) -> PipelineResult<Quiz> {
        validate_learner(learner_id)?;
        let input = ContentInput::Text(text.to_string());
        let fp = fingerprint(&input)?;
        let quiz = self
            .quizzes
            .build(text, topic, &fp, Tier::Standard, count)
            .await?;
        self.publish_quiz(learner_id, None, &quiz).await;
        self.issue_quiz(learner_id, &quiz);
        Ok(quiz)
    }

    /// Scores answers to a quiz issued by `process_content` or `generate_quiz`. The attempt
    /// feeds weak areas and the event stream like a session attempt, without touching any
    /// session.
    pub async fn score_quiz(
        &self,
        quiz_id: Uuid,
        learner_id: &str,
        answers: Vec<Option<String>>,
    ) -> PipelineResult<QuizAttemptOutcome> {
        let quiz = {
            let issued = self.issued_quizzes.read();
            match issued.get(&quiz_id) {
                Some(entry) if entry.learner_id == learner_id => Arc::clone(&entry.quiz),
                _ => return Err(PipelineError::QuizNotFound(quiz_id)),
            }
        };
        let ctx = AttemptContext {
            learner_id,
            session_id: None,
        };
        let record = scorer::score(&quiz, &answers, &ctx, &self.config.points)?;

        info!(
            quiz_id = %quiz_id,
            learner_id = %learner_id,
            score = record.score,
            points = record.points_awarded,
            "quiz attempt scored"
        );

        self.weak_areas.record(record.clone());
        self.publish_attempt(&record).await;
        Ok(QuizAttemptOutcome::from(&record))
    }

    /// Registers a session in `Building`. Input is validated before anything is stored. A
    /// learner holds at most one live session per topic; topics compare case-insensitively.
    pub async fn create_session(
        &self,
        learner_id: &str,
        input: ContentInput,
        topic: &str,
        tier: Tier,
    ) -> PipelineResult<Uuid> {
        validate_learner(learner_id)?;
        let topic = topic.split_whitespace().collect::<Vec<_>>().join(" ");
        if topic.is_empty() {
            return Err(PipelineError::invalid_input("topic must not be empty"));
        }
        let fp = fingerprint(&input)?;

        let topic_key = topic.to_lowercase();

        let session = MasterySession::new(learner_id, topic.clone(), input, fp, tier);
        let id = session.id;
        {
            let mut sessions = self.sessions.write();
            // A session whose lock is held is mid-operation, hence live.
            let active = sessions.iter().find(|(_, slot)| {
                slot.learner_id == learner_id
                    && slot.topic_key == topic_key
                    && slot.session.try_lock().map_or(true, |s| s.is_live())
            });
            if let Some((active_id, _)) = active {
                return Err(PipelineError::conflict(format!(
                    "session {active_id} for topic '{topic}' is still active"
                )));
            }
            sessions.insert(
                id,
                SessionSlot {
                    learner_id: learner_id.to_string(),
                    topic_key,
                    session: Arc::new(Mutex::new(session)),
                },
            );
        }

        info!(learner_id = %learner_id, session_id = %id, topic = %topic, %tier, "session created");
        self.events
            .publish(PipelineEvent::SessionStarted(SessionStartedPayload {
                learner_id: learner_id.to_string(),
                session_id: id.to_string(),
                topic,
                tier,
                timestamp: Utc::now(),
            }))
            .await;

        Ok(id)
    }

    /// Runs the `Building` phase for the session's current tier. Used for the first build,
    /// after a failed attempt moved the session to a lower tier, and for caller retries
    /// after a build failure.
    pub async fn build_session(
        &self,
        session_id: Uuid,
        learner_id: &str,
    ) -> PipelineResult<SessionSnapshot> {
        let handle = self.session_handle(session_id, learner_id)?;
        let ticket = handle.lock().await.begin_build()?;

        let built = self.build_artifacts(&ticket).await;

        let mut session = handle.lock().await;
        let (lookup, quiz) = match built {
            Ok(parts) => parts,
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    tier = %ticket.tier,
                    error = %err,
                    "session build failed"
                );
                session.fail_build(err.clone());
                return Err(err);
            }
        };

        if !session.complete_build(Arc::clone(&lookup.artifact), quiz.clone()) {
            return Err(PipelineError::conflict(format!(
                "session is {}, build result discarded",
                session.state.as_str()
            )));
        }
        let snapshot = session.snapshot();
        drop(session);

        let sid = session_id.to_string();
        self.publish_notes(learner_id, Some(&sid), &lookup, 0).await;
        self.publish_quiz(learner_id, Some(&sid), &quiz).await;
        info!(session_id = %session_id, tier = %ticket.tier, items = quiz.len(), "session ready");

        Ok(snapshot)
    }

    pub async fn submit_attempt(
        &self,
        session_id: Uuid,
        learner_id: &str,
        answers: Vec<Option<String>>,
    ) -> PipelineResult<AttemptOutcome> {
        let handle = self.session_handle(session_id, learner_id)?;

        let (record, transition, topic, attempt_count) = {
            let mut session = handle.lock().await;
            let quiz = session.begin_evaluation()?;
            let ctx = AttemptContext {
                learner_id,
                session_id: Some(session_id),
            };
            let record = match scorer::score(quiz, &answers, &ctx, &self.config.points) {
                Ok(record) => record,
                Err(err) => {
                    session.cancel_evaluation();
                    return Err(err);
                }
            };
            let transition = session.apply_attempt(record.clone())?;
            (
                record,
                transition,
                session.topic.clone(),
                session.attempts.len(),
            )
        };

        info!(
            session_id = %session_id,
            learner_id = %learner_id,
            score = record.score,
            from_tier = %transition.from_tier,
            state = transition.state.as_str(),
            "attempt scored"
        );

        self.weak_areas.record(record.clone());
        self.publish_attempt(&record).await;

        let sid = session_id.to_string();
        match transition.decision {
            Decision::Retry(lower) => {
                self.events
                    .publish(PipelineEvent::TierDowngraded(TierDowngradedPayload {
                        learner_id: learner_id.to_string(),
                        session_id: sid,
                        from_tier: transition.from_tier,
                        to_tier: lower,
                        timestamp: Utc::now(),
                    }))
                    .await;
            }
            Decision::Mastered | Decision::Exhausted => {
                self.events
                    .publish(PipelineEvent::SessionCompleted(SessionCompletedPayload {
                        learner_id: learner_id.to_string(),
                        session_id: sid,
                        topic,
                        outcome: transition.state,
                        final_tier: transition.tier,
                        attempt_count,
                        timestamp: Utc::now(),
                    }))
                    .await;
            }
        }

        let mut outcome = AttemptOutcome {
            attempt_id: record.id,
            score: record.score,
            correct_count: record.correct_count,
            total: record.total,
            points_awarded: record.points_awarded,
            session_state: transition.state,
            tier: transition.tier,
            next_action: transition.decision.next_action(),
            next_notes: None,
            next_quiz: None,
            build_error: None,
        };

        if transition.state == SessionState::Retrying {
            match self.build_session(session_id, learner_id).await {
                Ok(snapshot) => {
                    outcome.next_notes = snapshot.notes;
                    outcome.next_quiz = snapshot.quiz;
                }
                Err(err) => {
                    outcome.build_error = Some(SessionErrorView {
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    pub async fn abandon_session(
        &self,
        session_id: Uuid,
        learner_id: &str,
    ) -> PipelineResult<SessionSnapshot> {
        let handle = self.session_handle(session_id, learner_id)?;
        let snapshot = {
            let mut session = handle.lock().await;
            session.abandon()?;
            session.snapshot()
        };

        info!(session_id = %session_id, tier = %snapshot.current_tier, "session abandoned");
        self.events
            .publish(PipelineEvent::SessionCompleted(SessionCompletedPayload {
                learner_id: learner_id.to_string(),
                session_id: session_id.to_string(),
                topic: snapshot.topic.clone(),
                outcome: SessionState::Abandoned,
                final_tier: snapshot.current_tier,
                attempt_count: snapshot.attempts.len(),
                timestamp: Utc::now(),
            }))
            .await;

        Ok(snapshot)
    }

    pub async fn get_session(
        &self,
        session_id: Uuid,
        learner_id: &str,
    ) -> PipelineResult<SessionSnapshot> {
        let handle = self.session_handle(session_id, learner_id)?;
        let snapshot = handle.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn get_weak_areas(
        &self,
        learner_id: &str,
        window_size: Option<usize>,
    ) -> PipelineResult<Vec<WeakAreaEntry>> {
        validate_learner(learner_id)?;
        let window = window_size.unwrap_or(self.config.weak_area_window);
        if window == 0 || window > self.config.max_weak_area_window {
            return Err(PipelineError::invalid_input(format!(
                "windowSize must be between 1 and {}",
                self.config.max_weak_area_window
            )));
        }
        self.weak_areas.weak_areas(learner_id, window).await
    }

    /// Drops sessions and issued quizzes idle for longer than the configured retention.
    /// Sessions whose lock is held are skipped until the next sweep.
    pub fn evict_expired(&self) -> Evicted {
        let now = Utc::now();
        let retention = self.config.session_retention;

        let sessions = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, slot| {
                slot.session
                    .try_lock()
                    .map_or(true, |s| !s.is_evictable(now, retention))
            });
            before - sessions.len()
        };
        let quizzes = {
            let mut issued = self.issued_quizzes.write();
            let before = issued.len();
            issued.retain(|_, entry| {
                (now - entry.issued_at).to_std().unwrap_or_default() < retention
            });
            before - issued.len()
        };

        Evicted { sessions, quizzes }
    }

    fn issue_quiz(&self, learner_id: &str, quiz: &Quiz) {
        self.issued_quizzes.write().insert(
            quiz.id,
            IssuedQuiz {
                learner_id: learner_id.to_string(),
                quiz: Arc::new(quiz.clone()),
                issued_at: Utc::now(),
            },
        );
    }

    async fn notes_for(
        &self,
        input: &ContentInput,
        fp: &ContentFingerprint,
        tier: Tier,
    ) -> PipelineResult<CacheLookup> {
        self.cache
            .get_or_create(fp, tier, || async move {
                let raw = match input {
                    ContentInput::Text(text) => text.clone(),
                    ContentInput::Media(reference) => {
                        let transcript = self.source.resolve(reference).await?;
                        if transcript.trim().is_empty() {
                            return Err(PipelineError::NoTranscript(reference.clone()));
                        }
                        transcript
                    }
                };
                self.summarizer.summarize(&raw, tier).await
            })
            .await
    }

    async fn build_artifacts(&self, ticket: &BuildTicket) -> PipelineResult<(CacheLookup, Quiz)> {
        let lookup = self
            .notes_for(&ticket.input, &ticket.fingerprint, ticket.tier)
            .await?;
        let quiz = self
            .quizzes
            .build(
                &lookup.artifact.text,
                &ticket.topic,
                &ticket.fingerprint,
                ticket.tier,
                None,
            )
            .await?;
        Ok((lookup, quiz))
    }

    /// Sessions owned by another learner are reported as missing.
    fn session_handle(
        &self,
        session_id: Uuid,
        learner_id: &str,
    ) -> PipelineResult<Arc<Mutex<MasterySession>>> {
        let sessions = self.sessions.read();
        match sessions.get(&session_id) {
            Some(slot) if slot.learner_id == learner_id => Ok(Arc::clone(&slot.session)),
            _ => Err(PipelineError::SessionNotFound(session_id)),
        }
    }

    async fn publish_notes(
        &self,
        learner_id: &str,
        session_id: Option<&str>,
        lookup: &CacheLookup,
        points_delta: u32,
    ) {
        self.events
            .publish(PipelineEvent::NotesProduced(NotesProducedPayload {
                learner_id: learner_id.to_string(),
                session_id: session_id.map(str::to_string),
                fingerprint: lookup.artifact.fingerprint.to_string(),
                tier: lookup.artifact.tier,
                title: lookup.artifact.title.clone(),
                was_cache_hit: lookup.was_cache_hit,
                points_delta,
                timestamp: Utc::now(),
            }))
            .await;
    }

    async fn publish_quiz(&self, learner_id: &str, session_id: Option<&str>, quiz: &Quiz) {
        self.events
            .publish(PipelineEvent::QuizBuilt(QuizBuiltPayload {
                learner_id: learner_id.to_string(),
                session_id: session_id.map(str::to_string),
                quiz_id: quiz.id.to_string(),
                fingerprint: quiz.fingerprint.to_string(),
                tier: quiz.tier,
                topic: quiz.topic.clone(),
                item_count: quiz.len(),
                timestamp: Utc::now(),
            }))
            .await;
    }

    async fn publish_attempt(&self, record: &AttemptRecord) {
        self.events
            .publish(PipelineEvent::AttemptScored(AttemptScoredPayload {
                session_id: record.session_id.map(|id| id.to_string()),
                attempt: record.clone(),
                timestamp: Utc::now(),
            }))
            .await;
    }
}

/// Periodically evicts expired sessions and issued quizzes.
pub fn spawn_eviction_task(engine: Arc<MasteryEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            interval_timer.tick().await;
            let evicted = engine.evict_expired();
            if evicted != Evicted::default() {
                info!(
                    sessions = evicted.sessions,
                    quizzes = evicted.quizzes,
                    "evicted expired mastery state"
                );
            }
        }
    })
}

fn validate_learner(learner_id: &str) -> PipelineResult<()> {
    let trimmed = learner_id.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_LEARNER_ID_LEN {
        return Err(PipelineError::invalid_input("invalid learner id"));
    }
    Ok(())
}

fn topic_from_title(title: &str) -> String {
    if title.trim().is_empty() {
        "General".to_string()
    } else {
        title.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mastery::generation::GenerationPurpose;
    use crate::mastery::test_support::{default_response, quiz_json, ScriptedGenerator, StaticSource};

    const PHOTO: &str = "Photosynthesis is the process by which green plants use sunlight, \
                         water and carbon dioxide to produce glucose and oxygen.";

    fn engine_with(generator: Arc<ScriptedGenerator>, source: StaticSource) -> MasteryEngine {
        MasteryEngine::new(
            PipelineConfig::default(),
            generator,
            Arc::new(source),
            Arc::new(EventBus::new()),
        )
    }

    fn engine_with_config(
        generator: Arc<ScriptedGenerator>,
        config: PipelineConfig,
    ) -> MasteryEngine {
        MasteryEngine::new(
            config,
            generator,
            Arc::new(StaticSource::default()),
            Arc::new(EventBus::new()),
        )
    }

    fn engine(generator: Arc<ScriptedGenerator>) -> MasteryEngine {
        engine_with(generator, StaticSource::default())
    }

    /// `correct` answers of "A" followed by wrong ones.
    fn answers(correct: usize, total: usize) -> Vec<Option<String>> {
        (0..total)
            .map(|i| Some(if i < correct { "A" } else { "B" }.to_string()))
            .collect()
    }

    async fn ready_session(engine: &MasteryEngine, tier: Tier) -> Uuid {
        let id = engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Photosynthesis", tier)
            .await
            .unwrap();
        engine.build_session(id, "learner-1").await.unwrap();
        id
    }

    #[tokio::test]
    async fn processing_same_text_twice_hits_cache() {
        let generator = ScriptedGenerator::standard();
        let engine = engine(generator.clone());

        let first = engine
            .process_content("learner-1", ContentInput::Text(PHOTO.into()), Tier::Standard)
            .await
            .unwrap();
        assert!(!first.was_cache_hit);
        assert!((5..=10).contains(&first.quiz.len()));
        assert_eq!(first.notes.title, "Photosynthesis Basics");

        let spaced = format!("  {}  ", PHOTO.replace(' ', "   "));
        let second = engine
            .process_content("learner-1", ContentInput::Text(spaced), Tier::Standard)
            .await
            .unwrap();
        assert!(second.was_cache_hit);
        assert_eq!(first.notes.text, second.notes.text);
        assert_eq!(generator.calls_for(GenerationPurpose::ChunkSummary), 1);
        assert_eq!(generator.calls_for(GenerationPurpose::Quiz), 2);
    }

    #[tokio::test]
    async fn media_is_resolved_only_on_cache_miss() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let source = Arc::new(StaticSource::default().with(url, Ok(PHOTO.to_string())));
        let engine = MasteryEngine::new(
            PipelineConfig::default(),
            ScriptedGenerator::standard(),
            source.clone(),
            Arc::new(EventBus::new()),
        );
        let first = engine
            .process_content("l", ContentInput::Media(url.into()), Tier::Standard)
            .await
            .unwrap();
        let second = engine
            .process_content(
                "l",
                ContentInput::Media("https://youtu.be/dQw4w9WgXcQ".into()),
                Tier::Standard,
            )
            .await;
        assert!(!first.was_cache_hit);
        assert!(second.unwrap().was_cache_hit);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn source_failures_surface_unchanged() {
        let private = "https://example.com/private";
        let silent = "https://example.com/silent";
        let engine = engine_with(
            ScriptedGenerator::standard(),
            StaticSource::default()
                .with(private, Err(PipelineError::SourceUnavailable("private".into())))
                .with(silent, Ok("   ".into())),
        );

        let err = engine
            .process_content("l", ContentInput::Media(private.into()), Tier::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SOURCE_UNAVAILABLE");

        let err = engine
            .process_content("l", ContentInput::Media(silent.into()), Tier::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_TRANSCRIPT");
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_generation() {
        let generator = ScriptedGenerator::standard();
        let engine = engine(generator.clone());
        let err = engine
            .process_content("l", ContentInput::Text("   ".into()), Tier::Standard)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn failing_standard_attempt_rebuilds_at_simplified() {
        let generator = ScriptedGenerator::standard();
        let engine = engine(generator.clone());
        let id = ready_session(&engine, Tier::Standard).await;

        let outcome = engine
            .submit_attempt(id, "learner-1", answers(3, 10))
            .await
            .unwrap();

        assert!((outcome.score - 0.3).abs() < 1e-9);
        assert_eq!(outcome.session_state, SessionState::Retrying);
        assert_eq!(outcome.tier, Tier::Simplified);
        assert_eq!(outcome.next_action, NextAction::RetryWithSimplerNotes);
        assert_eq!(outcome.points_awarded, 31);
        let next_quiz = outcome.next_quiz.expect("retry quiz");
        assert_eq!(next_quiz.tier, Tier::Simplified);
        assert_eq!(outcome.next_notes.unwrap().text, "- simplified notes");

        let quiz_prompts: Vec<String> = generator
            .requests()
            .into_iter()
            .filter(|r| r.purpose == GenerationPurpose::Quiz)
            .map(|r| r.prompt)
            .collect();
        assert_eq!(quiz_prompts.len(), 2);
        assert!(quiz_prompts[1].contains("- simplified notes"));

        let snapshot = engine.get_session(id, "learner-1").await.unwrap();
        assert_eq!(snapshot.state, SessionState::AwaitingAttempt);
        assert_eq!(snapshot.tiers_visited, vec![Tier::Standard, Tier::Simplified]);
    }

    #[tokio::test]
    async fn failing_lowest_tier_exhausts_without_generation() {
        let generator = ScriptedGenerator::standard();
        let engine = engine(generator.clone());
        let id = ready_session(&engine, Tier::MostSimplified).await;
        let calls_before = generator.calls();

        let outcome = engine
            .submit_attempt(id, "learner-1", answers(4, 10))
            .await
            .unwrap();

        assert_eq!(outcome.session_state, SessionState::TierExhausted);
        assert_eq!(outcome.next_action, NextAction::Done);
        assert!(outcome.next_quiz.is_none());
        assert_eq!(generator.calls(), calls_before);

        let err = engine
            .submit_attempt(id, "learner-1", answers(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_CONFLICT");
    }

    #[tokio::test]
    async fn passing_attempt_masters_session() {
        let engine = engine(ScriptedGenerator::standard());
        let mut events = engine.events().subscribe_global();
        let id = ready_session(&engine, Tier::Standard).await;

        let outcome = engine
            .submit_attempt(id, "learner-1", answers(5, 10))
            .await
            .unwrap();
        assert_eq!(outcome.session_state, SessionState::Mastered);
        assert_eq!(outcome.tier, Tier::Standard);

        let mut types = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            types.push(envelope.event.event_type());
        }
        assert_eq!(
            types,
            vec![
                "SESSION_STARTED",
                "NOTES_PRODUCED",
                "QUIZ_BUILT",
                "ATTEMPT_SCORED",
                "SESSION_COMPLETED"
            ]
        );
    }

    #[tokio::test]
    async fn wrong_answer_count_changes_nothing() {
        let generator = ScriptedGenerator::new(|req| match req.purpose {
            GenerationPurpose::Quiz => Ok(quiz_json(6)),
            _ => default_response(req),
        });
        let engine = engine(generator);
        let id = ready_session(&engine, Tier::Standard).await;

        let err = engine
            .submit_attempt(id, "learner-1", answers(4, 4))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::MalformedSubmission {
                expected: 6,
                actual: 4
            }
        );

        let snapshot = engine.get_session(id, "learner-1").await.unwrap();
        assert_eq!(snapshot.state, SessionState::AwaitingAttempt);
        assert!(snapshot.attempts.is_empty());
        assert!(engine
            .get_weak_areas("learner-1", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_submissions_apply_once() {
        let engine = Arc::new(engine(ScriptedGenerator::standard()));
        let id = ready_session(&engine, Tier::MostSimplified).await;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.submit_attempt(id, "learner-1", answers(8, 10)).await })
            })
            .collect();

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(PipelineError::SessionConflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 3);
        let snapshot = engine.get_session(id, "learner-1").await.unwrap();
        assert_eq!(snapshot.attempts.len(), 1);
    }

    #[tokio::test]
    async fn build_failure_keeps_session_building_until_retry() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = Arc::clone(&fail);
        let generator = ScriptedGenerator::new(move |req| {
            if req.purpose == GenerationPurpose::Quiz
                && flag.load(std::sync::atomic::Ordering::SeqCst)
            {
                return Ok("no questions today".to_string());
            }
            default_response(req)
        });
        let engine = engine(generator);
        let id = engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Plants", Tier::Standard)
            .await
            .unwrap();

        let err = engine.build_session(id, "learner-1").await.unwrap_err();
        assert_eq!(err.code(), "GENERATION_FAILED");
        let snapshot = engine.get_session(id, "learner-1").await.unwrap();
        assert_eq!(snapshot.state, SessionState::Building);
        assert!(snapshot.last_error.is_some());

        fail.store(false, std::sync::atomic::Ordering::SeqCst);
        let snapshot = engine.build_session(id, "learner-1").await.unwrap();
        assert_eq!(snapshot.state, SessionState::AwaitingAttempt);
        assert!(snapshot.last_error.is_none());
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn sessions_are_private_to_their_learner() {
        let engine = engine(ScriptedGenerator::standard());
        let id = ready_session(&engine, Tier::Standard).await;

        let err = engine.get_session(id, "someone-else").await.unwrap_err();
        assert_eq!(err, PipelineError::SessionNotFound(id));
        let err = engine
            .submit_attempt(id, "someone-else", answers(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn abandoned_session_rejects_attempts() {
        let engine = engine(ScriptedGenerator::standard());
        let id = ready_session(&engine, Tier::Standard).await;

        let snapshot = engine.abandon_session(id, "learner-1").await.unwrap();
        assert_eq!(snapshot.state, SessionState::Abandoned);
        let err = engine
            .submit_attempt(id, "learner-1", answers(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_CONFLICT");
        assert!(engine.abandon_session(id, "learner-1").await.is_err());
    }

    #[tokio::test]
    async fn weak_areas_follow_failed_attempts() {
        let engine = engine(ScriptedGenerator::standard());
        let id = ready_session(&engine, Tier::Standard).await;
        engine
            .submit_attempt(id, "learner-1", answers(2, 10))
            .await
            .unwrap();

        let entries = engine.get_weak_areas("learner-1", Some(5)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].topic, "Photosynthesis");
        assert_eq!(entries[0].incorrect_count, 5);
        assert!(entries[0].explanation.is_some());

        let err = engine.get_weak_areas("learner-1", Some(0)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn standalone_quiz_uses_requested_topic() {
        let generator = ScriptedGenerator::standard();
        let engine = engine(generator.clone());
        let quiz = engine
            .generate_quiz("l", PHOTO, "Plants", Some(5))
            .await
            .unwrap();
        assert_eq!(quiz.topic, "Plants");
        assert!(quiz.items.iter().all(|i| i.topic == "Plants"));
        assert_eq!(generator.calls_for(GenerationPurpose::ChunkSummary), 0);
        assert_eq!(quiz.tier, Tier::Standard);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn engine_futures_are_send() {
        let engine = engine(ScriptedGenerator::standard());
        let id = Uuid::new_v4();
        assert_send(&engine.process_content(
            "learner-1",
            ContentInput::Text(PHOTO.into()),
            Tier::Standard,
        ));
        assert_send(&engine.build_session(id, "learner-1"));
        assert_send(&engine.submit_attempt(id, "learner-1", answers(1, 1)));
        assert_send(&engine.score_quiz(id, "learner-1", answers(1, 1)));
        assert_send(&engine.get_weak_areas("learner-1", None));
    }

    #[tokio::test]
    async fn second_live_session_for_same_topic_conflicts() {
        let engine = engine(ScriptedGenerator::standard());
        let first = ready_session(&engine, Tier::Standard).await;

        let err = engine
            .create_session(
                "learner-1",
                ContentInput::Text(PHOTO.into()),
                "  photosynthesis ",
                Tier::Simplified,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_CONFLICT");
        assert!(err.to_string().contains(&first.to_string()));
        assert_eq!(engine.session_count(), 1);

        engine
            .create_session("learner-2", ContentInput::Text(PHOTO.into()), "Photosynthesis", Tier::Standard)
            .await
            .unwrap();
        engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Cells", Tier::Standard)
            .await
            .unwrap();

        engine.abandon_session(first, "learner-1").await.unwrap();
        engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Photosynthesis", Tier::Standard)
            .await
            .unwrap();
        assert_eq!(engine.session_count(), 4);
    }

    #[tokio::test]
    async fn eviction_drops_finished_and_parked_sessions_only() {
        let config = PipelineConfig {
            session_retention: Duration::ZERO,
            ..PipelineConfig::default()
        };
        let engine = engine_with_config(ScriptedGenerator::standard(), config);

        let finished = ready_session(&engine, Tier::Standard).await;
        engine
            .submit_attempt(finished, "learner-1", answers(10, 10))
            .await
            .unwrap();
        let parked = engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Cells", Tier::Standard)
            .await
            .unwrap();
        let live = engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Mitosis", Tier::Standard)
            .await
            .unwrap();
        engine.build_session(live, "learner-1").await.unwrap();
        engine.generate_quiz("learner-1", PHOTO, "Plants", None).await.unwrap();
        assert_eq!(engine.issued_quiz_count(), 1);

        let evicted = engine.evict_expired();
        assert_eq!(evicted, Evicted { sessions: 2, quizzes: 1 });
        assert_eq!(engine.session_count(), 1);
        assert_eq!(engine.issued_quiz_count(), 0);
        assert_eq!(
            engine.get_session(finished, "learner-1").await.unwrap_err(),
            PipelineError::SessionNotFound(finished)
        );
        assert!(engine.get_session(parked, "learner-1").await.is_err());
        let snapshot = engine.get_session(live, "learner-1").await.unwrap();
        assert_eq!(snapshot.state, SessionState::AwaitingAttempt);

        assert_eq!(engine.evict_expired(), Evicted::default());
    }

    #[tokio::test]
    async fn default_retention_keeps_recent_sessions() {
        let engine = engine(ScriptedGenerator::standard());
        let id = ready_session(&engine, Tier::Standard).await;
        engine.abandon_session(id, "learner-1").await.unwrap();

        assert_eq!(engine.evict_expired(), Evicted::default());
        assert!(engine.get_session(id, "learner-1").await.is_ok());
    }

    #[tokio::test]
    async fn sessionless_quiz_attempt_feeds_weak_areas_and_events() {
        let engine = engine(ScriptedGenerator::standard());
        let mut events = engine.events().subscribe_global();
        let processed = engine
            .process_content("learner-1", ContentInput::Text(PHOTO.into()), Tier::Standard)
            .await
            .unwrap();
        let quiz_id = processed.quiz.id;

        let outcome = engine
            .score_quiz(quiz_id, "learner-1", answers(7, 10))
            .await
            .unwrap();
        assert_eq!(outcome.quiz_id, quiz_id);
        assert_eq!(outcome.correct_count, 7);
        assert!((outcome.score - 0.7).abs() < 1e-9);
        assert_eq!(outcome.points_awarded, 71);
        assert!(outcome.mastered);
        assert_eq!(outcome.item_results.iter().filter(|r| !r.correct).count(), 3);

        let mut scored = None;
        while let Ok(envelope) = events.try_recv() {
            if let PipelineEvent::AttemptScored(payload) = envelope.event {
                scored = Some(payload);
            }
        }
        let scored = scored.expect("attempt event");
        assert!(scored.session_id.is_none());
        assert_eq!(scored.attempt.id, outcome.attempt_id);
        assert_eq!(scored.attempt.points_awarded, 71);

        let entries = engine.get_weak_areas("learner-1", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].topic, "Photosynthesis Basics");
        assert_eq!(entries[0].incorrect_count, 3);

        let err = engine
            .score_quiz(quiz_id, "learner-2", answers(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::QuizNotFound(quiz_id));
        let missing = Uuid::new_v4();
        let err = engine
            .score_quiz(missing, "learner-1", answers(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "QUIZ_NOT_FOUND");
    }

    #[tokio::test]
    async fn short_answer_sheet_for_sessionless_quiz_is_rejected() {
        let generator = ScriptedGenerator::new(|req| match req.purpose {
            GenerationPurpose::Quiz => Ok(quiz_json(6)),
            _ => default_response(req),
        });
        let engine = engine(generator);
        let quiz = engine
            .generate_quiz("learner-1", PHOTO, "Cells", Some(6))
            .await
            .unwrap();
        assert_eq!(quiz.len(), 6);

        let err = engine
            .score_quiz(quiz.id, "learner-1", answers(4, 4))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::MalformedSubmission { expected: 6, actual: 4 });
        assert!(engine.get_weak_areas("learner-1", None).await.unwrap().is_empty());

        let outcome = engine
            .score_quiz(quiz.id, "learner-1", answers(2, 6))
            .await
            .unwrap();
        assert!(!outcome.mastered);
        assert_eq!(outcome.total, 6);
    }

    #[tokio::test]
    async fn weak_areas_rank_topics_across_sessions() {
        let engine = engine(ScriptedGenerator::standard());
        let cells = engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Cells", Tier::MostSimplified)
            .await
            .unwrap();
        engine.build_session(cells, "learner-1").await.unwrap();
        let mitosis = engine
            .create_session("learner-1", ContentInput::Text(PHOTO.into()), "Mitosis", Tier::Standard)
            .await
            .unwrap();
        engine.build_session(mitosis, "learner-1").await.unwrap();

        let outcome = engine
            .submit_attempt(cells, "learner-1", answers(4, 10))
            .await
            .unwrap();
        assert_eq!(outcome.session_state, SessionState::TierExhausted);
        let outcome = engine
            .submit_attempt(mitosis, "learner-1", answers(6, 10))
            .await
            .unwrap();
        assert_eq!(outcome.session_state, SessionState::Mastered);

        let entries = engine.get_weak_areas("learner-1", Some(20)).await.unwrap();
        let ranked: Vec<(&str, usize)> = entries
            .iter()
            .map(|e| (e.topic.as_str(), e.incorrect_count))
            .collect();
        assert_eq!(ranked, vec![("Cells", 6), ("Mitosis", 4)]);
        assert!(entries.iter().all(|e| e
            .explanation
            .as_deref()
            .is_some_and(|text| text.contains("worked example"))));
    }
}
