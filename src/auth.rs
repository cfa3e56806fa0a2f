use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::response::AppError;

pub const LEARNER_HEADER: &str = "x-learner-id";
const MAX_LEARNER_ID_LEN: usize = 128;

/// Opaque learner identity supplied by the fronting identity layer. It is trusted as-is;
/// this service never authenticates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerId(pub String);

impl LearnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn extract_learner_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LEARNER_HEADER)?.to_str().ok()?.trim();
    if value.is_empty()
        || value.len() > MAX_LEARNER_ID_LEN
        || value.chars().any(char::is_control)
    {
        return None;
    }
    Some(value.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for LearnerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_learner_id(&parts.headers)
            .map(LearnerId)
            .ok_or_else(|| AppError::unauthorized("missing or invalid X-Learner-Id header"))
    }
}
