use std::net::SocketAddr;
use std::sync::Arc;

use mastery_backend::config::Config;
use mastery_backend::core::EventBus;
use mastery_backend::db;
use mastery_backend::logging::init_tracing;
use mastery_backend::mastery::spawn_eviction_task;
use mastery_backend::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let events = Arc::new(EventBus::new());
    let (engine, generator_available) = AppState::create_engine(&config, Arc::clone(&events));

    let (event_store, recorder) =
        match db::attach_event_store(config.event_store_url.as_deref(), &events).await {
            Some((store, handle)) => (Some(store), Some(handle)),
            None => (None, None),
        };

    let sweep_every = config
        .pipeline
        .session_retention
        .min(std::time::Duration::from_secs(60));
    let sweeper = spawn_eviction_task(Arc::clone(&engine), sweep_every);

    let state = AppState::new(engine, event_store).with_generator_available(generator_available);
    let app = mastery_backend::app(state);

    let addr = config.bind_addr();
    tracing::info!(%addr, "mastery-backend listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "bind listener failed");
            std::process::exit(1);
        }
    };

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, initiating graceful shutdown sequence");

    sweeper.abort();
    if let Some(handle) = recorder {
        handle.abort();
    }

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
