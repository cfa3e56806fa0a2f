//! Adaptive mastery pipeline: content fingerprinting and caching, tiered notes, quiz
//! construction and scoring, the retry state machine and weak-area mining.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod quiz;
pub mod scorer;
pub mod session;
pub mod source;
pub mod summarizer;
pub mod types;
pub mod weak_areas;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CacheLookup, CacheStats, ContentCache};
pub use config::{PipelineConfig, PointsPolicy, QuizConfig, SummaryConfig, MASTERY_THRESHOLD};
pub use engine::{
    spawn_eviction_task, AttemptOutcome, Evicted, MasteryEngine, QuizAttemptOutcome,
};
pub use error::{PipelineError, PipelineResult};
pub use fingerprint::fingerprint;
pub use generation::{
    GenerationConstraints, GenerationPurpose, GenerationRequest, TextGenerator,
};
pub use session::{SessionSnapshot, Transition};
pub use source::ContentSource;
pub use types::{
    AttemptRecord, ContentFingerprint, ContentInput, ItemResult, NextAction, NotesArtifact,
    ProcessedContent, Quiz, QuizItem, QuizItemKind, QuizView, SessionState, Tier,
    WeakAreaEntry,
};
