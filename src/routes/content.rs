use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{json_body, parse_tier, ContentFields};
use crate::auth::LearnerId;
use crate::mastery::{NotesArtifact, Quiz};
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProcessContentRequest {
    #[serde(flatten)]
    content: ContentFields,
    tier: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessContentResponse {
    notes: NotesArtifact,
    /// Sessionless quizzes carry their answer key; the caller checks answers itself.
    quiz: Quiz,
    was_cache_hit: bool,
}

pub(super) async fn process(
    State(state): State<AppState>,
    learner: LearnerId,
    payload: Result<Json<ProcessContentRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(payload)?;
    let tier = parse_tier(body.tier.as_deref())?;
    let input = body.content.into_input()?;

    let processed = state
        .engine()
        .process_content(learner.as_str(), input, tier)
        .await?;

    Ok(ok(ProcessContentResponse {
        notes: NotesArtifact::clone(&processed.notes),
        quiz: processed.quiz,
        was_cache_hit: processed.was_cache_hit,
    }))
}
