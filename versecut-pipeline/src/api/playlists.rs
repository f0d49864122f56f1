//! Playlist and import endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::curated;
use crate::error::{ApiError, ApiResult};
use crate::runner::import::{ImportRequest, ImportStatus};
use crate::runner::RunnerError;
use crate::AppState;

/// One playlist in the listing
#[derive(Debug, Serialize)]
pub struct PlaylistSummary {
    pub id: i64,
    pub youtube_url: String,
    pub genre: String,
    pub name: Option<String>,
    pub track_count: i64,
    pub imported_at: Option<String>,
}

/// GET /api/v1/playlists response
#[derive(Debug, Serialize)]
pub struct PlaylistListResponse {
    pub playlists: Vec<PlaylistSummary>,
    pub total: usize,
}

/// POST /api/v1/playlists/import request
#[derive(Debug, Deserialize)]
pub struct ImportPlaylistRequest {
    pub url: String,
    pub genre: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /api/v1/playlists/import response
#[derive(Debug, Serialize)]
pub struct ImportPlaylistResponse {
    pub task_id: Uuid,
    pub message: String,
}

/// POST /api/v1/import/stop response
#[derive(Debug, Serialize)]
pub struct ImportStopResponse {
    pub stopped: bool,
    pub message: String,
}

/// GET /api/v1/playlists
pub async fn list_playlists(State(state): State<AppState>) -> ApiResult<Json<PlaylistListResponse>> {
    let rows = curated::list_playlists(&state.curated)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let playlists: Vec<PlaylistSummary> = rows
        .into_iter()
        .map(|p| PlaylistSummary {
            id: p.id,
            youtube_url: p.youtube_url,
            genre: p.genre,
            name: p.name,
            track_count: p.track_count,
            imported_at: p.imported_at,
        })
        .collect();

    Ok(Json(PlaylistListResponse {
        total: playlists.len(),
        playlists,
    }))
}

/// POST /api/v1/playlists/import
///
/// Kicks off the import runner and returns its task id; per-video progress
/// streams on `/api/v1/pipeline/events`. 409 while an import is in flight.
pub async fn import_playlist(
    State(state): State<AppState>,
    Json(request): Json<ImportPlaylistRequest>,
) -> ApiResult<Json<ImportPlaylistResponse>> {
    if request.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url cannot be empty".to_string()));
    }

    let task_id = state
        .import
        .start(ImportRequest {
            playlist_url: request.url,
            genre: request.genre,
            dry_run: request.dry_run,
        })
        .map_err(|e| match e {
            RunnerError::Busy(msg) => ApiError::Conflict(msg),
            RunnerError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            RunnerError::Other(e) => ApiError::Internal(e.to_string()),
        })?;

    Ok(Json(ImportPlaylistResponse {
        task_id,
        message: "Import started. Connect to the event stream for progress.".to_string(),
    }))
}

/// GET /api/v1/import/status
pub async fn import_status(State(state): State<AppState>) -> Json<ImportStatus> {
    Json(state.import.status())
}

/// POST /api/v1/import/stop
pub async fn import_stop(State(state): State<AppState>) -> Json<ImportStopResponse> {
    let stopped = state.import.stop();
    let message = if stopped {
        "Stop requested. Import will stop after current video.".to_string()
    } else {
        "No import is currently running.".to_string()
    };
    Json(ImportStopResponse { stopped, message })
}
