use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::error::PipelineResult;
use super::generation::{
    with_deadline, GenerationConstraints, GenerationPurpose, GenerationRequest, TextGenerator,
};
use super::types::{AttemptRecord, WeakAreaEntry};

/// Append-only per-learner attempt history.
#[derive(Default)]
pub struct AttemptLog {
    by_learner: RwLock<HashMap<String, Vec<AttemptRecord>>>,
}

impl AttemptLog {
    pub fn append(&self, record: AttemptRecord) {
        self.by_learner
            .write()
            .entry(record.learner_id.clone())
            .or_default()
            .push(record);
    }

    pub fn history(&self, learner_id: &str) -> Vec<AttemptRecord> {
        self.by_learner
            .read()
            .get(learner_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, learner_id: &str) -> usize {
        self.by_learner.read().get(learner_id).map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTally {
    pub topic: String,
    pub incorrect_count: usize,
    pub last_incorrect_at: DateTime<Utc>,
    /// Position of the topic's most recent miss in the window; 0 is the newest.
    pub recency: usize,
}

/// Ranks topics over the `window` most recent incorrect item results.
///
/// Attempts are ordered newest first by submission time (later appends win ties) and
/// items within an attempt count as more recent the later they appear.
pub fn aggregate(history: &[AttemptRecord], window: usize) -> Vec<TopicTally> {
    let mut attempts: Vec<&AttemptRecord> = history.iter().rev().collect();
    attempts.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

    let misses = attempts
        .iter()
        .flat_map(|attempt| {
            attempt
                .incorrect_topics()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .map(move |topic| (topic, attempt.submitted_at))
        })
        .take(window);

    let mut tallies: Vec<TopicTally> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (position, (topic, at)) in misses.enumerate() {
        match index.get(topic) {
            Some(&i) => tallies[i].incorrect_count += 1,
            None => {
                index.insert(topic, tallies.len());
                tallies.push(TopicTally {
                    topic: topic.to_string(),
                    incorrect_count: 1,
                    last_incorrect_at: at,
                    recency: position,
                });
            }
        }
    }

    tallies.sort_by(|a, b| {
        b.incorrect_count
            .cmp(&a.incorrect_count)
            .then(a.recency.cmp(&b.recency))
    });
    tallies
}

type ExplanationKey = (String, String);

#[derive(Default)]
struct ExplanationCache {
    entries: HashMap<ExplanationKey, String>,
    epochs: HashMap<ExplanationKey, u64>,
}

/// Mines learner history for weak topics and attaches cached remedial explanations.
pub struct WeakAreaAggregator {
    log: AttemptLog,
    explanations: Mutex<ExplanationCache>,
    generator: Arc<dyn TextGenerator>,
    timeout: Option<Duration>,
}

impl WeakAreaAggregator {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Option<Duration>) -> Self {
        Self {
            log: AttemptLog::default(),
            explanations: Mutex::new(ExplanationCache::default()),
            generator,
            timeout,
        }
    }

    pub fn log(&self) -> &AttemptLog {
        &self.log
    }

    /// Appends an attempt and drops cached explanations for topics it got wrong.
    pub fn record(&self, record: AttemptRecord) {
        {
            let mut cache = self.explanations.lock();
            for topic in record.incorrect_topics() {
                let key = (record.learner_id.clone(), topic.to_string());
                cache.entries.remove(&key);
                *cache.epochs.entry(key).or_default() += 1;
            }
        }
        self.log.append(record);
    }

    pub async fn weak_areas(
        &self,
        learner_id: &str,
        window: usize,
    ) -> PipelineResult<Vec<WeakAreaEntry>> {
        let history = self.log.history(learner_id);
        let tallies = aggregate(&history, window);
        debug!(
            learner_id = %learner_id,
            attempts = history.len(),
            topics = tallies.len(),
            "weak areas aggregated"
        );

        let explanations = join_all(
            tallies
                .iter()
                .map(|tally| self.explanation(learner_id, tally)),
        )
        .await;

        Ok(tallies
            .into_iter()
            .zip(explanations)
            .map(|(tally, explanation)| WeakAreaEntry {
                topic: tally.topic,
                incorrect_count: tally.incorrect_count,
                last_incorrect_at: tally.last_incorrect_at,
                explanation,
            })
            .collect())
    }

    async fn explanation(&self, learner_id: &str, tally: &TopicTally) -> Option<String> {
        let key = (learner_id.to_string(), tally.topic.clone());
        let epoch = {
            let cache = self.explanations.lock();
            if let Some(text) = cache.entries.get(&key) {
                return Some(text.clone());
            }
            cache.epochs.get(&key).copied().unwrap_or(0)
        };

        let request = GenerationRequest {
            purpose: GenerationPurpose::Explanation,
            system: "You are a patient tutor helping a learner fix a misunderstanding."
                .to_string(),
            prompt: format!(
                "The learner answered {} recent questions about \"{}\" incorrectly. Explain the \
                 core idea of this topic in plain language with one short example, then give one \
                 tip for remembering it.",
                tally.incorrect_count, tally.topic
            ),
            constraints: GenerationConstraints {
                max_words: Some(150),
                json_output: false,
            },
        };

        match with_deadline(self.timeout, "explanation", self.generator.generate(&request)).await {
            Ok(text) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                let mut cache = self.explanations.lock();
                if cache.epochs.get(&key).copied().unwrap_or(0) == epoch {
                    cache.entries.insert(key, text.clone());
                }
                Some(text)
            }
            Ok(_) => {
                warn!(topic = %tally.topic, "explanation generator returned empty text");
                None
            }
            Err(err) => {
                warn!(topic = %tally.topic, error = %err, "explanation generation failed");
                None
            }
        }
    }
}
