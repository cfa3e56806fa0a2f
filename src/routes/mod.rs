mod content;
mod health;
mod quizzes;
mod sessions;
mod weak_areas;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::mastery::{ContentInput, Tier};
use crate::response::{json_error, AppError};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let healthcheck_endpoint = normalize_healthcheck_endpoint(
        std::env::var("HEALTHCHECK_ENDPOINT")
            .ok()
            .as_deref()
            .unwrap_or("/health"),
    );

    let mut app = Router::new()
        .route(
            "/api/content/process",
            post(content::process).fallback(fallback_handler),
        )
        .route(
            "/api/sessions",
            post(sessions::create).fallback(fallback_handler),
        )
        .route(
            "/api/sessions/:id",
            get(sessions::get_one).fallback(fallback_handler),
        )
        .route(
            "/api/sessions/:id/attempts",
            post(sessions::submit_attempt).fallback(fallback_handler),
        )
        .route(
            "/api/sessions/:id/retry",
            post(sessions::retry_build).fallback(fallback_handler),
        )
        .route(
            "/api/sessions/:id/abandon",
            post(sessions::abandon).fallback(fallback_handler),
        )
        .route(
            "/api/quizzes",
            post(quizzes::generate).fallback(fallback_handler),
        )
        .route(
            "/api/quizzes/:id/attempts",
            post(quizzes::submit_answers).fallback(fallback_handler),
        )
        .route(
            "/api/weak-areas",
            get(weak_areas::list).fallback(fallback_handler),
        );

    let mut health_paths: Vec<String> = vec!["/health".to_string()];
    if healthcheck_endpoint.as_str() != "/health" && healthcheck_endpoint.as_str() != "/" {
        health_paths.push(healthcheck_endpoint);
    }
    if !health_paths.iter().any(|path| path == "/api/health") {
        health_paths.push("/api/health".to_string());
    }

    for path in &health_paths {
        app = app.nest(path.as_str(), health::router());
    }

    app.fallback(fallback_handler).with_state(state)
}

/// Content reference shared by the processing and session bodies: exactly one of `text`
/// or `videoUrl`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentFields {
    text: Option<String>,
    video_url: Option<String>,
}

impl ContentFields {
    fn into_input(self) -> Result<ContentInput, AppError> {
        let text = self.text.filter(|t| !t.trim().is_empty());
        let video_url = self.video_url.filter(|u| !u.trim().is_empty());
        match (text, video_url) {
            (Some(text), None) => Ok(ContentInput::Text(text)),
            (None, Some(url)) => Ok(ContentInput::Media(url.trim().to_string())),
            (Some(_), Some(_)) => Err(AppError::validation(
                "provide either text or videoUrl, not both",
            )),
            (None, None) => Err(AppError::validation("text or videoUrl is required")),
        }
    }
}

fn parse_tier(raw: Option<&str>) -> Result<Tier, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Tier::Standard),
        Some(value) => Tier::parse(value).ok_or_else(|| {
            AppError::validation(format!(
                "unknown tier '{value}', expected standard, simplified or mostSimplified"
            ))
        }),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}

fn normalize_healthcheck_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "/health".to_string();
    }

    let with_slash = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };

    if with_slash != "/" {
        with_slash.trim_end_matches('/').to_string()
    } else {
        "/".to_string()
    }
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}
