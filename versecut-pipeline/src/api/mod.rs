//! HTTP control plane
//!
//! Thin request/response layer over the runners, the catalog queries, the
//! event bus, and the search surface. JSON over HTTP with permissive CORS
//! for the dev origins.

pub mod embed;
pub mod events;
pub mod pipeline;
pub mod playlists;
pub mod search;
pub mod stats;
pub mod tracks;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};

use crate::AppState;

/// Origins the dev frontends run on
const DEV_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:3000",
    "http://127.0.0.1:5173",
    "http://127.0.0.1:3000",
];

fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = DEV_ORIGINS
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any())
}

/// GET /api/v1/health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats::get_stats))
        .route("/api/v1/playlists", get(playlists::list_playlists))
        .route("/api/v1/playlists/import", post(playlists::import_playlist))
        .route("/api/v1/import/status", get(playlists::import_status))
        .route("/api/v1/import/stop", post(playlists::import_stop))
        .route("/api/v1/tracks", get(tracks::list_tracks))
        .route("/api/v1/tracks/skipped", get(tracks::list_skipped))
        .route("/api/v1/pipeline/start", post(pipeline::start_pipeline))
        .route("/api/v1/pipeline/stop", post(pipeline::stop_pipeline))
        .route("/api/v1/pipeline/status", get(pipeline::pipeline_status))
        .route("/api/v1/pipeline/events", get(events::event_stream))
        .route("/api/v1/search", post(search::search))
        .route("/api/v1/embed", post(embed::create_embedding))
        .layer(cors_layer())
        .with_state(state)
}
