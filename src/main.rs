mod agent;
mod config;
mod error;
mod jitter;
mod participant;
mod pipeline;
mod protocol;
mod recording;
mod room;
mod room_manager;
mod ws;

use axum::{
    http::{HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recording::{NullRecorder, PcmFileRecorder, Recorder};
use room_manager::RoomManager;

// ─── AppState ───────────────────────────────────────────────────────────────

pub struct AppState {
    pub room_manager: Arc<RoomManager>,
    pub config: config::Config,
}

// ─── Health endpoint ────────────────────────────────────────────────────────

async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "app": state.config.app_name,
        "env": state.config.app_env,
        "rooms_active": state.room_manager.room_count(),
    }))
}

// ─── CORS configuration ─────────────────────────────────────────────────────

fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        warn!("CORS: permissive mode (allow all origins) — not suitable for production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<HeaderValue>().expect("invalid origin header value"))
            .collect();

        info!("CORS: restricted to {} origin(s)", origins.len());

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET])
            .allow_headers([HeaderName::from_static("content-type")])
    }
}

// ─── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("VOICEROOM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .init();

    let cfg = config::Config::from_env();
    if let Err(e) = cfg.validate() {
        panic!("{e}");
    }

    let recorder: Arc<dyn Recorder> = if cfg.recording_enabled {
        Arc::new(PcmFileRecorder::new(cfg.recording_dir.clone()))
    } else {
        Arc::new(NullRecorder)
    };

    let room_manager = Arc::new(RoomManager::new(recorder));
    let bind_addr = cfg.bind_addr.clone();
    let cors = build_cors_layer(&cfg.allowed_origins);

    let state = Arc::new(AppState {
        room_manager,
        config: cfg,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/:room_id/:username", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    info!("voiceroom listening on http://{bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
