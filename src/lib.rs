pub mod auth;
pub mod config;
pub mod core;
pub mod db;
pub mod logging;
pub mod mastery;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::core::EventBus;
use crate::state::AppState;

/// Router with the service's standard layers applied.
pub fn app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Builds the application from environment configuration, without a background event
/// store recorder.
pub async fn create_app() -> axum::Router {
    let config = Config::from_env();
    let events = Arc::new(EventBus::new());
    let (engine, available) = AppState::create_engine(&config, events);
    app(AppState::new(engine, None).with_generator_available(available))
}
