use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::auth::LearnerId;
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WeakAreasQuery {
    window_size: Option<String>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    learner: LearnerId,
    Query(query): Query<WeakAreasQuery>,
) -> Result<Response, AppError> {
    let window_size = match query.window_size.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
            AppError::validation("windowSize must be a positive integer")
        })?),
    };

    let entries = state
        .engine()
        .get_weak_areas(learner.as_str(), window_size)
        .await?;
    Ok(ok(entries))
}
