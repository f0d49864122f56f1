//! Semantic search endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::embedder::TextEmbedder;
use crate::error::{ApiError, ApiResult};
use crate::index::{SearchFilters, SnippetIndex};
use crate::AppState;

fn default_limit() -> usize {
    10
}

/// POST /api/v1/search request
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub genre: Option<String>,
    pub emotion: Option<String>,
    pub energy: Option<String>,
}

/// One matched snippet
#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub snippet_id: String,
    pub score: f32,
    pub song_title: String,
    pub artist: String,
    pub album: Option<String>,
    pub lyrics: String,
    pub ai_description: String,
    pub snippet_url: String,
    pub start_time: f64,
    pub end_time: f64,
    pub primary_emotion: String,
    pub secondary_emotion: Option<String>,
    pub energy: String,
    pub genre: String,
}

/// POST /api/v1/search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub total: usize,
}

/// POST /api/v1/search
///
/// Embeds the query text and runs a filtered similarity search over the
/// snippet index.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let embedder = state.embedder.clone();
    let query_text = request.query.clone();
    let vector = tokio::task::spawn_blocking(move || embedder.embed(&query_text))
        .await
        .map_err(|e| ApiError::Internal(format!("embedding task failed: {e}")))?
        .map_err(|e| ApiError::Internal(format!("Failed to embed query: {e}")))?;

    let hits = state
        .index
        .search(
            vector,
            request.limit,
            SearchFilters {
                energy: request.energy.clone(),
                primary_emotion: request.emotion.clone(),
                genre: request.genre.clone(),
            },
        )
        .await
        .map_err(|e| ApiError::Internal(format!("Search failed: {e}")))?;

    let str_field = |payload: &serde_json::Value, key: &str| {
        payload[key].as_str().unwrap_or_default().to_string()
    };

    let results: Vec<SearchResultItem> = hits
        .into_iter()
        .map(|hit| SearchResultItem {
            snippet_id: hit.snippet_id,
            score: hit.score,
            song_title: str_field(&hit.payload, "song_title"),
            artist: str_field(&hit.payload, "artist"),
            album: hit.payload["album"].as_str().map(|s| s.to_string()),
            lyrics: str_field(&hit.payload, "lyrics"),
            ai_description: str_field(&hit.payload, "ai_description"),
            snippet_url: str_field(&hit.payload, "snippet_url"),
            start_time: hit.payload["start_time"].as_f64().unwrap_or(0.0),
            end_time: hit.payload["end_time"].as_f64().unwrap_or(0.0),
            primary_emotion: str_field(&hit.payload, "primary_emotion"),
            secondary_emotion: hit.payload["secondary_emotion"].as_str().map(|s| s.to_string()),
            energy: str_field(&hit.payload, "energy"),
            genre: str_field(&hit.payload, "genre"),
        })
        .collect();

    Ok(Json(SearchResponse {
        query: request.query,
        total: results.len(),
        results,
    }))
}
