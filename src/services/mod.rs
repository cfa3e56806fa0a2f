pub mod llm_provider;
pub mod transcript;

pub use llm_provider::{LLMError, LLMProvider};
pub use transcript::{HttpTranscriptSource, TranscriptError};
