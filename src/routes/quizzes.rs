use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::json_body;
use crate::auth::LearnerId;
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateQuizRequest {
    text: String,
    topic: Option<String>,
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubmitAnswersRequest {
    answers: Vec<Option<String>>,
}

pub(super) async fn generate(
    State(state): State<AppState>,
    learner: LearnerId,
    payload: Result<Json<GenerateQuizRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(payload)?;
    let topic = body.topic.unwrap_or_default();
    let quiz = state
        .engine()
        .generate_quiz(learner.as_str(), &body.text, &topic, body.count)
        .await?;
    Ok(ok(quiz))
}

/// Scores answers to a quiz returned by content processing or quiz generation.
pub(super) async fn submit_answers(
    State(state): State<AppState>,
    learner: LearnerId,
    Path(id): Path<String>,
    payload: Result<Json<SubmitAnswersRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let quiz_id = Uuid::parse_str(id.trim())
        .map_err(|_| AppError::not_found(format!("quiz {id} not found")))?;
    let body = json_body(payload)?;
    let outcome = state
        .engine()
        .score_quiz(quiz_id, learner.as_str(), body.answers)
        .await?;
    Ok(ok(outcome))
}
