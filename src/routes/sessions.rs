use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{json_body, parse_tier, ContentFields};
use crate::auth::LearnerId;
use crate::response::{created, ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateSessionRequest {
    #[serde(flatten)]
    content: ContentFields,
    topic: Option<String>,
    tier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubmitAttemptRequest {
    answers: Vec<Option<String>>,
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::not_found(format!("session {raw} not found")))
}

/// Creates the session and runs its first build. A failed build leaves the session in
/// place; the error carries its id so the caller can retry.
pub(super) async fn create(
    State(state): State<AppState>,
    learner: LearnerId,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(payload)?;
    let tier = parse_tier(body.tier.as_deref())?;
    let input = body.content.into_input()?;
    let topic = body.topic.unwrap_or_default();

    let engine = state.engine();
    let session_id = engine
        .create_session(learner.as_str(), input, &topic, tier)
        .await?;

    match engine.build_session(session_id, learner.as_str()).await {
        Ok(snapshot) => Ok(created(snapshot)),
        Err(err) => Err(AppError::from(err).with_details(json!({
            "sessionId": session_id,
        }))),
    }
}

pub(super) async fn get_one(
    State(state): State<AppState>,
    learner: LearnerId,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let session_id = parse_session_id(&id)?;
    let snapshot = state
        .engine()
        .get_session(session_id, learner.as_str())
        .await?;
    Ok(ok(snapshot))
}

pub(super) async fn submit_attempt(
    State(state): State<AppState>,
    learner: LearnerId,
    Path(id): Path<String>,
    payload: Result<Json<SubmitAttemptRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let session_id = parse_session_id(&id)?;
    let body = json_body(payload)?;
    let outcome = state
        .engine()
        .submit_attempt(session_id, learner.as_str(), body.answers)
        .await?;
    Ok(ok(outcome))
}

pub(super) async fn retry_build(
    State(state): State<AppState>,
    learner: LearnerId,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let session_id = parse_session_id(&id)?;
    let snapshot = state
        .engine()
        .build_session(session_id, learner.as_str())
        .await?;
    Ok(ok(snapshot))
}

pub(super) async fn abandon(
    State(state): State<AppState>,
    learner: LearnerId,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let session_id = parse_session_id(&id)?;
    let snapshot = state
        .engine()
        .abandon_session(session_id, learner.as_str())
        .await?;
    Ok(ok(snapshot))
}
