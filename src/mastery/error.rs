use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the mastery pipeline. Every variant is a per-request,
/// recoverable failure; none of them leave partial notes or quizzes behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("content source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("no transcript available: {0}")]
    NoTranscript(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("quiz has {valid} valid items, at least {required} required")]
    InsufficientQuizItems { valid: usize, required: usize },
    #[error("expected {expected} answers, got {actual}")]
    MalformedSubmission { expected: usize, actual: usize },
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("quiz {0} not found")]
    QuizNotFound(Uuid),
    #[error("session conflict: {0}")]
    SessionConflict(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            PipelineError::NoTranscript(_) => "NO_TRANSCRIPT",
            PipelineError::Generation(_) => "GENERATION_FAILED",
            PipelineError::InsufficientQuizItems { .. } => "INSUFFICIENT_QUIZ_ITEMS",
            PipelineError::MalformedSubmission { .. } => "MALFORMED_SUBMISSION",
            PipelineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            PipelineError::QuizNotFound(_) => "QUIZ_NOT_FOUND",
            PipelineError::SessionConflict(_) => "SESSION_CONFLICT",
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        PipelineError::InvalidInput(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        PipelineError::Generation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PipelineError::SessionConflict(message.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
