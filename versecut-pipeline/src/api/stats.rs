//! Statistics endpoint

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::db::curated;
use crate::error::{ApiError, ApiResult};
use crate::index::SnippetIndex;
use crate::runner::pipeline::{SOURCE_CURATED, SOURCE_LRCLIB};
use crate::AppState;

/// Track count for one genre
#[derive(Debug, Serialize)]
pub struct GenreCount {
    pub genre: String,
    pub count: i64,
}

/// GET /api/v1/stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub curated_total: i64,
    pub curated_by_genre: Vec<GenreCount>,
    pub processed_total: i64,
    pub processed_by_source: HashMap<String, i64>,
    pub indexed_total: u64,
    pub skipped_total: i64,
}

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let by_genre = curated::genre_counts(&state.curated)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let curated_total = by_genre.iter().map(|(_, n)| n).sum();
    let curated_by_genre = by_genre
        .into_iter()
        .map(|(genre, count)| GenreCount { genre, count })
        .collect();

    let processed_curated = state
        .ledger
        .processed_count(Some(SOURCE_CURATED))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let processed_lrclib = state
        .ledger
        .processed_count(Some(SOURCE_LRCLIB))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // The index may be down; stats still answer
    let indexed_total = state.index.count().await.unwrap_or(0);

    let skipped_total = curated::skipped_count(&state.curated)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(StatsResponse {
        curated_total,
        curated_by_genre,
        processed_total: processed_curated + processed_lrclib,
        processed_by_source: HashMap::from([
            (SOURCE_LRCLIB.to_string(), processed_lrclib),
            (SOURCE_CURATED.to_string(), processed_curated),
        ]),
        indexed_total,
        skipped_total,
    }))
}
