//! Per-session mastery state machine.
//!
//! `decide` is the pure transition function from an attempt score to the next step. The
//! `MasterySession` methods apply it and guard every other transition, so callers only
//! ever see the states drawn in the lifecycle:
//!
//! Building -> AwaitingAttempt -> Evaluating -> Mastered | Retrying | TierExhausted
//! Retrying -> Building (at the next lower tier)
//! any non-terminal state -> Abandoned

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::config::MASTERY_THRESHOLD;
use super::error::{PipelineError, PipelineResult};
use super::types::{
    AttemptRecord, ContentFingerprint, ContentInput, NextAction, NotesArtifact, Quiz, QuizView,
    SessionState, Tier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Mastered,
    Retry(Tier),
    Exhausted,
}

impl Decision {
    pub fn next_action(self) -> NextAction {
        match self {
            Decision::Retry(_) => NextAction::RetryWithSimplerNotes,
            Decision::Mastered | Decision::Exhausted => NextAction::Done,
        }
    }
}

pub fn decide(score: f64, tier: Tier) -> Decision {
    if score >= MASTERY_THRESHOLD {
        Decision::Mastered
    } else {
        match tier.next_lower() {
            Some(lower) => Decision::Retry(lower),
            None => Decision::Exhausted,
        }
    }
}

/// Outcome of applying one scored attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from_tier: Tier,
    pub decision: Decision,
    pub state: SessionState,
    pub tier: Tier,
}

/// What a build needs, captured while the session lock is held.
#[derive(Debug, Clone)]
pub struct BuildTicket {
    pub tier: Tier,
    pub input: ContentInput,
    pub fingerprint: ContentFingerprint,
    pub topic: String,
}

#[derive(Debug, Clone)]
pub struct MasterySession {
    pub id: Uuid,
    pub learner_id: String,
    pub topic: String,
    pub input: ContentInput,
    pub fingerprint: ContentFingerprint,
    pub state: SessionState,
    pub current_tier: Tier,
    pub tiers_visited: Vec<Tier>,
    pub notes: Option<Arc<NotesArtifact>>,
    pub quiz: Option<Quiz>,
    pub attempts: Vec<AttemptRecord>,
    pub last_error: Option<PipelineError>,
    build_in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MasterySession {
    pub fn new(
        learner_id: impl Into<String>,
        topic: impl Into<String>,
        input: ContentInput,
        fingerprint: ContentFingerprint,
        tier: Tier,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            learner_id: learner_id.into(),
            topic: topic.into(),
            input,
            fingerprint,
            state: SessionState::Building,
            current_tier: tier,
            tiers_visited: vec![tier],
            notes: None,
            quiz: None,
            attempts: Vec::new(),
            last_error: None,
            build_in_progress: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_building(&self) -> bool {
        self.build_in_progress
    }

    /// Claims the build for the current tier. Only one build may run at a time.
    pub fn begin_build(&mut self) -> PipelineResult<BuildTicket> {
        if self.build_in_progress {
            return Err(PipelineError::conflict("a build is already in progress"));
        }
        match self.state {
            SessionState::Building | SessionState::Retrying => {}
            other => {
                return Err(PipelineError::conflict(format!(
                    "cannot build notes while session is {}",
                    other.as_str()
                )))
            }
        }
        self.state = SessionState::Building;
        self.build_in_progress = true;
        self.touch();
        Ok(BuildTicket {
            tier: self.current_tier,
            input: self.input.clone(),
            fingerprint: self.fingerprint.clone(),
            topic: self.topic.clone(),
        })
    }

    /// Returns false when the session moved on (abandoned) while the build ran; the
    /// results are then discarded.
    pub fn complete_build(&mut self, notes: Arc<NotesArtifact>, quiz: Quiz) -> bool {
        self.build_in_progress = false;
        if self.state != SessionState::Building {
            return false;
        }
        self.notes = Some(notes);
        self.quiz = Some(quiz);
        self.last_error = None;
        self.state = SessionState::AwaitingAttempt;
        self.touch();
        true
    }

    /// A failed build leaves the session in `Building` for a caller-initiated retry.
    pub fn fail_build(&mut self, error: PipelineError) {
        self.build_in_progress = false;
        if self.state == SessionState::Building {
            self.last_error = Some(error);
            self.touch();
        }
    }

    /// Moves to `Evaluating` and hands back the quiz to score against.
    pub fn begin_evaluation(&mut self) -> PipelineResult<&Quiz> {
        if self.state != SessionState::AwaitingAttempt {
            return Err(PipelineError::conflict(format!(
                "session is {}, not awaiting an attempt",
                self.state.as_str()
            )));
        }
        let Some(quiz) = self.quiz.as_ref() else {
            return Err(PipelineError::conflict("session has no quiz"));
        };
        self.state = SessionState::Evaluating;
        Ok(quiz)
    }

    /// Rolls back a rejected submission without any other mutation.
    pub fn cancel_evaluation(&mut self) {
        if self.state == SessionState::Evaluating {
            self.state = SessionState::AwaitingAttempt;
        }
    }

    pub fn apply_attempt(&mut self, record: AttemptRecord) -> PipelineResult<Transition> {
        if self.state != SessionState::Evaluating {
            return Err(PipelineError::conflict(format!(
                "cannot apply an attempt while session is {}",
                self.state.as_str()
            )));
        }
        let from_tier = self.current_tier;
        let decision = decide(record.score, from_tier);
        self.attempts.push(record);

        self.state = match decision {
            Decision::Mastered => SessionState::Mastered,
            Decision::Exhausted => SessionState::TierExhausted,
            Decision::Retry(lower) => {
                debug_assert!(lower > from_tier);
                self.current_tier = lower;
                self.tiers_visited.push(lower);
                self.notes = None;
                self.quiz = None;
                SessionState::Retrying
            }
        };
        self.touch();

        Ok(Transition {
            from_tier,
            decision,
            state: self.state,
            tier: self.current_tier,
        })
    }

    pub fn abandon(&mut self) -> PipelineResult<()> {
        if self.state.is_terminal() {
            return Err(PipelineError::conflict(format!(
                "session already {}",
                self.state.as_str()
            )));
        }
        self.state = SessionState::Abandoned;
        self.touch();
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            learner_id: self.learner_id.clone(),
            topic: self.topic.clone(),
            state: self.state,
            current_tier: self.current_tier,
            tiers_visited: self.tiers_visited.clone(),
            notes: self.notes.as_deref().cloned(),
            quiz: self.quiz.as_ref().map(Quiz::public_view),
            attempts: self.attempts.iter().map(AttemptSummary::from).collect(),
            last_error: self.last_error.as_ref().map(|e| SessionErrorView {
                code: e.code(),
                message: e.to_string(),
            }),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// A live session occupies its (learner, topic) slot.
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Finished sessions, and sessions parked in `Building` with no build running, are
    /// dropped once idle for `retention`. Sessions waiting on an attempt are kept.
    pub fn is_evictable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let idle = (now - self.updated_at).to_std().unwrap_or_default();
        if idle < retention {
            return false;
        }
        let parked = self.state == SessionState::Building && !self.build_in_progress;
        self.state.is_terminal() || parked
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub id: Uuid,
    pub tier: Tier,
    pub correct_count: usize,
    pub total: usize,
    pub score: f64,
    pub points_awarded: u32,
    pub submitted_at: DateTime<Utc>,
}

impl From<&AttemptRecord> for AttemptSummary {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            id: record.id,
            tier: record.tier,
            correct_count: record.correct_count,
            total: record.total,
            score: record.score,
            points_awarded: record.points_awarded,
            submitted_at: record.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorView {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub learner_id: String,
    pub topic: String,
    pub state: SessionState,
    pub current_tier: Tier,
    pub tiers_visited: Vec<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<NotesArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizView>,
    pub attempts: Vec<AttemptSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SessionErrorView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
