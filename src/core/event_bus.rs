use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::mastery::{AttemptRecord, SessionState, Tier};

const CHANNEL_CAPACITY: usize = 1024;

/// Immutable facts emitted by the pipeline. Points are reported as deltas only; running
/// totals belong to whoever consumes the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    #[serde(rename = "NOTES_PRODUCED")]
    NotesProduced(NotesProducedPayload),

    #[serde(rename = "QUIZ_BUILT")]
    QuizBuilt(QuizBuiltPayload),

    #[serde(rename = "SESSION_STARTED")]
    SessionStarted(SessionStartedPayload),

    #[serde(rename = "ATTEMPT_SCORED")]
    AttemptScored(AttemptScoredPayload),

    #[serde(rename = "TIER_DOWNGRADED")]
    TierDowngraded(TierDowngradedPayload),

    #[serde(rename = "SESSION_COMPLETED")]
    SessionCompleted(SessionCompletedPayload),
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::NotesProduced(_) => "NOTES_PRODUCED",
            PipelineEvent::QuizBuilt(_) => "QUIZ_BUILT",
            PipelineEvent::SessionStarted(_) => "SESSION_STARTED",
            PipelineEvent::AttemptScored(_) => "ATTEMPT_SCORED",
            PipelineEvent::TierDowngraded(_) => "TIER_DOWNGRADED",
            PipelineEvent::SessionCompleted(_) => "SESSION_COMPLETED",
        }
    }

    pub fn learner_id(&self) -> &str {
        match self {
            PipelineEvent::NotesProduced(p) => &p.learner_id,
            PipelineEvent::QuizBuilt(p) => &p.learner_id,
            PipelineEvent::SessionStarted(p) => &p.learner_id,
            PipelineEvent::AttemptScored(p) => &p.attempt.learner_id,
            PipelineEvent::TierDowngraded(p) => &p.learner_id,
            PipelineEvent::SessionCompleted(p) => &p.learner_id,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::NotesProduced(p) => p.session_id.as_deref(),
            PipelineEvent::QuizBuilt(p) => p.session_id.as_deref(),
            PipelineEvent::SessionStarted(p) => Some(&p.session_id),
            PipelineEvent::AttemptScored(p) => p.session_id.as_deref(),
            PipelineEvent::TierDowngraded(p) => Some(&p.session_id),
            PipelineEvent::SessionCompleted(p) => Some(&p.session_id),
        }
    }

    pub fn points_delta(&self) -> u32 {
        match self {
            PipelineEvent::NotesProduced(p) => p.points_delta,
            PipelineEvent::AttemptScored(p) => p.attempt.points_awarded,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesProducedPayload {
    pub learner_id: String,
    pub session_id: Option<String>,
    pub fingerprint: String,
    pub tier: Tier,
    pub title: String,
    pub was_cache_hit: bool,
    pub points_delta: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizBuiltPayload {
    pub learner_id: String,
    pub session_id: Option<String>,
    pub quiz_id: String,
    pub fingerprint: String,
    pub tier: Tier,
    pub topic: String,
    pub item_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub topic: String,
    pub tier: Tier,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptScoredPayload {
    pub session_id: Option<String>,
    pub attempt: AttemptRecord,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDowngradedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub from_tier: Tier,
    pub to_tier: Tier,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCompletedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub topic: String,
    pub outcome: SessionState,
    pub final_tier: Tier,
    pub attempt_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: String,
    pub event: PipelineEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: PipelineEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

type SubscriberId = String;

struct Subscriber {
    learner_id: Option<String>,
    session_id: Option<String>,
    event_types: Option<Vec<String>>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl Subscriber {
    fn matches(&self, envelope: &EventEnvelope) -> bool {
        if let Some(ref learner_id) = self.learner_id {
            if envelope.event.learner_id() != learner_id {
                return false;
            }
        }

        if let Some(ref session_id) = self.session_id {
            if envelope.event.session_id() != Some(session_id.as_str()) {
                return false;
            }
        }

        if let Some(ref event_types) = self.event_types {
            if !event_types
                .iter()
                .any(|t| t == envelope.event.event_type())
            {
                return false;
            }
        }

        true
    }
}

pub struct EventBus {
    global_sender: broadcast::Sender<EventEnvelope>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    event_count: RwLock<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global_sender,
            subscribers: RwLock::new(HashMap::new()),
            event_count: RwLock::new(0),
        }
    }

    pub async fn publish(&self, event: PipelineEvent) {
        let envelope = EventEnvelope::new(event);
        let event_type = envelope.event.event_type();
        let learner_id = envelope.event.learner_id().to_string();

        {
            let mut count = self.event_count.write().await;
            *count += 1;
        }

        let subscribers = self.subscribers.read().await;
        let mut sent_count = 0usize;

        for subscriber in subscribers.values() {
            if subscriber.matches(&envelope) && subscriber.sender.send(envelope.clone()).is_ok() {
                sent_count += 1;
            }
        }

        if self.global_sender.send(envelope).is_err() {
            debug!("No global subscribers for event");
        }

        debug!(
            event_type = event_type,
            learner_id = %learner_id,
            sent_to = sent_count,
            "Event published"
        );
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    pub async fn subscribe_filtered(
        &self,
        learner_id: Option<String>,
        session_id: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> (SubscriberId, broadcast::Receiver<EventEnvelope>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let subscriber_id = uuid::Uuid::new_v4().to_string();

        let subscriber = Subscriber {
            learner_id,
            session_id,
            event_types,
            sender,
        };

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(subscriber_id.clone(), subscriber);
        }

        debug!(subscriber_id = %subscriber_id, "New filtered subscription created");

        (subscriber_id, receiver)
    }

    pub async fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers.len() + self.global_sender.receiver_count()
    }

    pub async fn event_count(&self) -> u64 {
        *self.event_count.read().await
    }

    pub async fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_events: self.event_count().await,
            subscriber_count: self.subscriber_count().await,
            global_subscribers: self.global_sender.receiver_count(),
            filtered_subscribers: self.subscribers.read().await.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusStats {
    pub total_events: u64,
    pub subscriber_count: usize,
    pub global_subscribers: usize,
    pub filtered_subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes_event(learner: &str) -> PipelineEvent {
        PipelineEvent::NotesProduced(NotesProducedPayload {
            learner_id: learner.to_string(),
            session_id: None,
            fingerprint: "abc".to_string(),
            tier: Tier::Standard,
            title: "Photosynthesis".to_string(),
            was_cache_hit: false,
            points_delta: 2,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe_global();

        bus.publish(notes_event("learner1")).await;

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.event.event_type(), "NOTES_PRODUCED");
        assert_eq!(envelope.event.learner_id(), "learner1");
        assert_eq!(envelope.event.points_delta(), 2);
        assert_eq!(bus.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new();
        let (_, mut receiver) = bus
            .subscribe_filtered(
                Some("learner1".to_string()),
                None,
                Some(vec!["NOTES_PRODUCED".to_string()]),
            )
            .await;

        bus.publish(notes_event("learner2")).await;
        bus.publish(notes_event("learner1")).await;

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.event.learner_id(), "learner1");
        assert!(receiver.try_recv().is_err());

        let stats = bus.stats().await;
        assert_eq!(stats.filtered_subscribers, 1);
        assert_eq!(stats.total_events, 2);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(notes_event("l")).unwrap();
        assert_eq!(json["type"], "NOTES_PRODUCED");
        assert_eq!(json["payload"]["tier"], "standard");
    }
}
