//! Embedding endpoint for external services

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::embedder::TextEmbedder;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/v1/embed request
#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

/// POST /api/v1/embed response
#[derive(Debug, Serialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
}

/// POST /api/v1/embed
///
/// Embeds arbitrary text with the snippet model, so sibling services query
/// the index with compatible vectors.
pub async fn create_embedding(
    State(state): State<AppState>,
    Json(request): Json<EmbedRequest>,
) -> ApiResult<Json<EmbedResponse>> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text cannot be empty".to_string()));
    }

    let started = std::time::Instant::now();
    let embedder = state.embedder.clone();
    let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
        .await
        .map_err(|e| ApiError::Internal(format!("embedding task failed: {e}")))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        dimensions = embedding.len(),
        "Embed request served"
    );

    Ok(Json(EmbedResponse { embedding }))
}
