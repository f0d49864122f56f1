//! Track listing endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::curated;
use crate::error::{ApiError, ApiResult};
use crate::runner::pipeline::SOURCE_CURATED;
use crate::AppState;

fn default_limit() -> usize {
    50
}

/// GET /api/v1/tracks query parameters
#[derive(Debug, Deserialize)]
pub struct TracksQuery {
    pub genre: Option<String>,
    /// "pending" or "processed"
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// One track in the listing
#[derive(Debug, Serialize)]
pub struct TrackItem {
    pub id: i64,
    pub artist_name: String,
    pub name: String,
    pub album_name: Option<String>,
    pub duration: f64,
    pub genre: String,
    pub youtube_video_id: String,
    pub is_processed: bool,
}

/// GET /api/v1/tracks response
#[derive(Debug, Serialize)]
pub struct TrackListResponse {
    pub tracks: Vec<TrackItem>,
    pub total: i64,
    pub offset: usize,
    pub limit: usize,
}

/// GET /api/v1/tracks/skipped query parameters
#[derive(Debug, Deserialize)]
pub struct SkippedQuery {
    pub playlist_id: Option<i64>,
}

/// One skipped track in the listing
#[derive(Debug, Serialize)]
pub struct SkippedItem {
    pub id: i64,
    pub playlist_id: i64,
    pub youtube_video_id: String,
    pub youtube_title: String,
    pub parsed_artist: Option<String>,
    pub parsed_title: Option<String>,
    pub reason: String,
    pub imported_at: Option<String>,
}

/// GET /api/v1/tracks/skipped response
#[derive(Debug, Serialize)]
pub struct SkippedListResponse {
    pub tracks: Vec<SkippedItem>,
    pub total: usize,
}

/// GET /api/v1/tracks
///
/// Pages through curated tracks; `status=pending` hides ledgered tracks,
/// `status=processed` shows only them.
pub async fn list_tracks(
    State(state): State<AppState>,
    Query(query): Query<TracksQuery>,
) -> ApiResult<Json<TrackListResponse>> {
    if query.limit < 1 || query.limit > 500 {
        return Err(ApiError::BadRequest(
            "limit must be between 1 and 500".to_string(),
        ));
    }
    let only_pending = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(true),
        Some("processed") => Some(false),
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "status must be pending or processed, got {other}"
            )))
        }
    };

    let processed_ids = state
        .ledger
        .processed_ids(SOURCE_CURATED)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let rows = curated::list_tracks(&state.curated, query.genre.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let tracks: Vec<TrackItem> = rows
        .into_iter()
        .map(|t| {
            let is_processed = processed_ids.contains(&t.id);
            TrackItem {
                id: t.id,
                artist_name: t.artist_name,
                name: t.name,
                album_name: t.album_name,
                duration: t.duration,
                genre: t.genre,
                youtube_video_id: t.youtube_video_id,
                is_processed,
            }
        })
        .filter(|t| match only_pending {
            Some(true) => !t.is_processed,
            Some(false) => t.is_processed,
            None => true,
        })
        .skip(query.offset)
        .take(query.limit)
        .collect();

    let total = curated::track_count(&state.curated, query.genre.as_deref())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(TrackListResponse {
        tracks,
        total,
        offset: query.offset,
        limit: query.limit,
    }))
}

/// GET /api/v1/tracks/skipped
pub async fn list_skipped(
    State(state): State<AppState>,
    Query(query): Query<SkippedQuery>,
) -> ApiResult<Json<SkippedListResponse>> {
    let rows = curated::list_skipped(&state.curated, query.playlist_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let tracks: Vec<SkippedItem> = rows
        .into_iter()
        .map(|s| SkippedItem {
            id: s.id,
            playlist_id: s.playlist_id,
            youtube_video_id: s.youtube_video_id,
            youtube_title: s.youtube_title,
            parsed_artist: s.parsed_artist,
            parsed_title: s.parsed_title,
            reason: s.reason,
            imported_at: s.imported_at,
        })
        .collect();

    Ok(Json(SkippedListResponse {
        total: tracks.len(),
        tracks,
    }))
}
