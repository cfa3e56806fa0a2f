use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::core::EventBusStats;
use crate::mastery::CacheStats;
use crate::state::AppState;

const STORE_PING_TIMEOUT: Duration = Duration::from_secs(2);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/info", get(info))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn root(State(state): State<AppState>) -> Response {
    let store = event_store_check(&state).await;
    let ok = !matches!(store, StoreCheckStatus::Unreachable);

    let response = HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        timestamp: now_iso(),
        event_store: store.as_str(),
    };

    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    let engine = state.engine();
    let response = HealthInfoResponse {
        service: "mastery-backend",
        version: app_version(),
        environment: std::env::var("APP_ENV")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "development".to_string()),
        start_time: system_time_iso(state.started_at_system()),
        uptime: state.uptime_seconds(),
        generator_configured: state.generator_available(),
        active_sessions: engine.session_count(),
        cache: engine.cache_stats(),
        events: state.events().stats().await,
    };

    Json(response).into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    let response = LivenessResponse {
        status: "healthy",
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
        version: app_version(),
    };
    Json(response).into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    let store = event_store_check(&state).await;
    let generator = state.generator_available();

    let status = match (&store, generator) {
        (StoreCheckStatus::Unreachable, _) => "unhealthy",
        (_, false) => "degraded",
        _ => "healthy",
    };

    let response = ReadinessResponse {
        status,
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
        checks: ReadinessChecks {
            event_store: store.as_str(),
            event_store_latency: match store {
                StoreCheckStatus::Connected { latency_ms } => Some(latency_ms),
                _ => None,
            },
            generator,
        },
    };

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(response)).into_response()
}

#[derive(Debug)]
enum StoreCheckStatus {
    Disabled,
    Connected { latency_ms: u64 },
    Unreachable,
}

impl StoreCheckStatus {
    fn as_str(&self) -> &'static str {
        match self {
            StoreCheckStatus::Disabled => "disabled",
            StoreCheckStatus::Connected { .. } => "connected",
            StoreCheckStatus::Unreachable => "unreachable",
        }
    }
}

async fn event_store_check(state: &AppState) -> StoreCheckStatus {
    let Some(store) = state.event_store() else {
        return StoreCheckStatus::Disabled;
    };

    let started = Instant::now();
    let ping = sqlx::query("SELECT 1").execute(store.pool());
    match tokio::time::timeout(STORE_PING_TIMEOUT, ping).await {
        Ok(Ok(_)) => StoreCheckStatus::Connected {
            latency_ms: started.elapsed().as_millis() as u64,
        },
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "event store ping failed");
            StoreCheckStatus::Unreachable
        }
        Err(_) => {
            tracing::warn!("event store ping timed out");
            StoreCheckStatus::Unreachable
        }
    }
}

fn app_version() -> String {
    std::env::var("APP_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}

fn system_time_iso(time: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = time.into();
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    event_store: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthInfoResponse {
    service: &'static str,
    version: String,
    environment: String,
    start_time: String,
    uptime: u64,
    generator_configured: bool,
    active_sessions: usize,
    cache: CacheStats,
    events: EventBusStats,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
    checks: ReadinessChecks,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessChecks {
    event_store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_store_latency: Option<u64>,
    generator: bool,
}
