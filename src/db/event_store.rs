use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{
    AttemptScoredPayload, EventBus, EventEnvelope, NotesProducedPayload, PipelineEvent,
};

/// Event types the store persists; everything else stays in-process.
pub const RECORDED_EVENT_TYPES: [&str; 2] = ["ATTEMPT_SCORED", "NOTES_PRODUCED"];

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS "attempt_records" (
        "id" TEXT PRIMARY KEY,
        "event_id" TEXT NOT NULL,
        "quiz_id" TEXT NOT NULL,
        "session_id" TEXT,
        "learner_id" TEXT NOT NULL,
        "topic" TEXT NOT NULL,
        "tier" TEXT NOT NULL,
        "correct_count" INTEGER NOT NULL,
        "total" INTEGER NOT NULL,
        "score" REAL NOT NULL,
        "points_awarded" INTEGER NOT NULL,
        "payload" TEXT NOT NULL,
        "submitted_at" TEXT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS "idx_attempt_records_learner" ON "attempt_records" ("learner_id", "submitted_at")"#,
    r#"
    CREATE TABLE IF NOT EXISTS "notes_artifacts" (
        "event_id" TEXT PRIMARY KEY,
        "fingerprint" TEXT NOT NULL,
        "tier" TEXT NOT NULL,
        "title" TEXT NOT NULL,
        "learner_id" TEXT NOT NULL,
        "session_id" TEXT,
        "was_cache_hit" INTEGER NOT NULL,
        "points_delta" INTEGER NOT NULL,
        "recorded_at" TEXT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS "idx_notes_artifacts_fingerprint" ON "notes_artifacts" ("fingerprint", "tier")"#,
];

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("serialize failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only SQLite sink for attempt records and notes references.
#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub async fn connect(url: &str) -> Result<Self, EventStoreError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| EventStoreError::Config(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement.trim()).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Persists the events this store cares about; everything else is ignored.
    pub async fn record(&self, envelope: &EventEnvelope) -> Result<bool, EventStoreError> {
        match &envelope.event {
            PipelineEvent::AttemptScored(payload) => {
                self.record_attempt(&envelope.id, payload).await?;
                Ok(true)
            }
            PipelineEvent::NotesProduced(payload) => {
                self.record_notes(&envelope.id, payload).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(
        &self,
        event_id: &str,
        payload: &AttemptScoredPayload,
    ) -> Result<(), EventStoreError> {
        let attempt = &payload.attempt;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO "attempt_records" (
                "id", "event_id", "quiz_id", "session_id", "learner_id", "topic", "tier",
                "correct_count", "total", "score", "points_awarded", "payload", "submitted_at"
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.id.to_string())
        .bind(event_id)
        .bind(attempt.quiz_id.to_string())
        .bind(attempt.session_id.map(|id| id.to_string()))
        .bind(&attempt.learner_id)
        .bind(&attempt.topic)
        .bind(attempt.tier.as_str())
        .bind(attempt.correct_count as i64)
        .bind(attempt.total as i64)
        .bind(attempt.score)
        .bind(i64::from(attempt.points_awarded))
        .bind(serde_json::to_string(attempt)?)
        .bind(attempt.submitted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_notes(
        &self,
        event_id: &str,
        payload: &NotesProducedPayload,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO "notes_artifacts" (
                "event_id", "fingerprint", "tier", "title", "learner_id", "session_id",
                "was_cache_hit", "points_delta", "recorded_at"
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event_id)
        .bind(&payload.fingerprint)
        .bind(payload.tier.as_str())
        .bind(&payload.title)
        .bind(&payload.learner_id)
        .bind(payload.session_id.as_deref())
        .bind(payload.was_cache_hit)
        .bind(i64::from(payload.points_delta))
        .bind(payload.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_attempts(&self, learner_id: &str) -> Result<u64, EventStoreError> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM "attempt_records" WHERE "learner_id" = ?"#)
                .bind(learner_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn count_notes(&self) -> Result<u64, EventStoreError> {
        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "notes_artifacts""#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Filtered bus subscription carrying only the recorded event types.
    pub async fn subscribe(bus: &EventBus) -> broadcast::Receiver<EventEnvelope> {
        let types = RECORDED_EVENT_TYPES.iter().map(|t| t.to_string()).collect();
        let (subscriber_id, receiver) = bus.subscribe_filtered(None, None, Some(types)).await;
        debug!(subscriber_id = %subscriber_id, "event store subscribed");
        receiver
    }

    /// Drains the bus into the store until every sender is gone.
    pub fn spawn_recorder(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<EventEnvelope>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("event store recorder started");
            loop {
                match receiver.recv().await {
                    Ok(envelope) => match self.record(&envelope).await {
                        Ok(true) => debug!(event_id = %envelope.id, "event persisted"),
                        Ok(false) => {}
                        Err(err) => warn!(
                            event_id = %envelope.id,
                            error = %err,
                            "failed to persist event"
                        ),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event store recorder lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("event store recorder stopped");
        })
    }
}
