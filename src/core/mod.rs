mod event_bus;

pub use event_bus::{
    AttemptScoredPayload, EventBus, EventBusStats, EventEnvelope, NotesProducedPayload,
    PipelineEvent, QuizBuiltPayload, SessionCompletedPayload, SessionStartedPayload,
    TierDowngradedPayload,
};
