//! Pipeline control endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::runner::pipeline::{PipelineRequest, PipelineStatus};
use crate::runner::RunnerError;
use crate::AppState;

fn default_source() -> String {
    "curated".to_string()
}

/// POST /api/v1/pipeline/start request
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default = "default_source")]
    pub source: String,
    pub genre: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub reprocess: bool,
}

/// POST /api/v1/pipeline/start response
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub task_id: Uuid,
    pub total_tracks: usize,
    pub message: String,
}

/// POST /api/v1/pipeline/stop response
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub message: String,
}

/// POST /api/v1/pipeline/start
///
/// Returns immediately with a task id; progress streams on
/// `/api/v1/pipeline/events`. 409 while a job is in flight.
pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<StartResponse>> {
    let (task_id, total_tracks) = state
        .pipeline
        .start(PipelineRequest {
            source: request.source,
            genre: request.genre,
            limit: request.limit,
            dry_run: request.dry_run,
            reprocess: request.reprocess,
        })
        .await
        .map_err(|e| match e {
            RunnerError::Busy(msg) => ApiError::Conflict(msg),
            RunnerError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            RunnerError::Other(e) => ApiError::Internal(e.to_string()),
        })?;

    Ok(Json(StartResponse {
        task_id,
        total_tracks,
        message: format!("Pipeline started. Processing {total_tracks} tracks."),
    }))
}

/// POST /api/v1/pipeline/stop
pub async fn stop_pipeline(State(state): State<AppState>) -> Json<StopResponse> {
    let stopped = state.pipeline.stop();
    let message = if stopped {
        "Stop requested. Pipeline will stop after current track.".to_string()
    } else {
        "No pipeline is currently running.".to_string()
    };
    Json(StopResponse { stopped, message })
}

/// GET /api/v1/pipeline/status
pub async fn pipeline_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(state.pipeline.status())
}
