//! Event types and event bus for the versecut pipeline
//!
//! Every job-level state transition in the pipeline and import runners is
//! published here as a typed event. The HTTP surface forwards events to SSE
//! subscribers; the CLI prints them. Producers never block on consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline and import events
///
/// Serialized with a string `type` discriminator so the SSE boundary can name
/// the event without inspecting its payload. Every event carries the
/// `task_id` of the job that issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Pipeline job accepted and scheduled
    PipelineStarted {
        task_id: Uuid,
        source: String,
        total_tracks: usize,
        dry_run: bool,
    },

    /// Phase 1 (batched LLM segmentation) begins
    BatchSegmentationStarted {
        task_id: Uuid,
        total_tracks: usize,
        batch_size: usize,
        total_batches: usize,
    },

    /// One batch call finished
    BatchSegmentationProgress {
        task_id: Uuid,
        batch: usize,
        total_batches: usize,
        segmented: usize,
        failed: usize,
    },

    /// Phase 1 finished; per-track processing begins
    BatchSegmentationComplete {
        task_id: Uuid,
        cached_tracks: usize,
    },

    /// Per-track processing of one track begins
    TrackStart {
        task_id: Uuid,
        track_id: i64,
        title: String,
        artist: String,
        index: usize,
        total: usize,
    },

    /// Track finished with at least one indexed segment
    TrackComplete {
        task_id: Uuid,
        track_id: i64,
        segments_indexed: usize,
        dry_run: bool,
    },

    /// Track failed; nothing was indexed for it
    TrackError {
        task_id: Uuid,
        track_id: i64,
        errors: Vec<String>,
    },

    /// LLM provider signalled a rate limit; the job terminated cleanly
    ///
    /// The wait is surfaced as data, never slept through: by the time a
    /// subscriber sees this event the runner has already returned.
    RateLimited {
        task_id: Uuid,
        provider: Option<String>,
        retry_after_seconds: f64,
    },

    /// Pipeline stopped cooperatively between tracks
    PipelineStopped { task_id: Uuid, reason: String },

    /// All tracks processed
    PipelineComplete {
        task_id: Uuid,
        processed: usize,
        skipped: usize,
        segments_indexed: usize,
    },

    /// Fatal error outside the per-track loop
    PipelineError { task_id: Uuid, error: String },

    /// Import job fetching playlist metadata
    ImportFetching { task_id: Uuid, playlist_url: String },

    /// Playlist metadata fetched; per-video processing begins
    ImportStarted {
        task_id: Uuid,
        playlist_name: String,
        total_videos: usize,
        genre: String,
    },

    /// One video is being resolved (stage: parsing / searching_lyrics)
    ImportTrackProcessing {
        task_id: Uuid,
        index: usize,
        total: usize,
        video_title: String,
        stage: String,
    },

    /// Video resolved to lyrics and stored
    ImportTrackImported {
        task_id: Uuid,
        index: usize,
        artist: String,
        title: String,
        video_title: String,
        dry_run: bool,
    },

    /// Video skipped with a reason (parse failure, no lyrics, duplicate)
    ImportTrackSkipped {
        task_id: Uuid,
        index: usize,
        video_title: String,
        reason: String,
    },

    /// Import stopped cooperatively between videos
    ImportStopped { task_id: Uuid, reason: String },

    /// All videos processed
    ImportComplete {
        task_id: Uuid,
        playlist_name: String,
        total_videos: usize,
        imported: usize,
        skipped: usize,
    },

    /// Fatal error outside the per-video loop
    ImportError { task_id: Uuid, error: String },
}

impl Event {
    /// Get event type as string for the SSE `event:` field and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::PipelineStarted { .. } => "pipeline_started",
            Event::BatchSegmentationStarted { .. } => "batch_segmentation_started",
            Event::BatchSegmentationProgress { .. } => "batch_segmentation_progress",
            Event::BatchSegmentationComplete { .. } => "batch_segmentation_complete",
            Event::TrackStart { .. } => "track_start",
            Event::TrackComplete { .. } => "track_complete",
            Event::TrackError { .. } => "track_error",
            Event::RateLimited { .. } => "rate_limited",
            Event::PipelineStopped { .. } => "pipeline_stopped",
            Event::PipelineComplete { .. } => "pipeline_complete",
            Event::PipelineError { .. } => "pipeline_error",
            Event::ImportFetching { .. } => "import_fetching",
            Event::ImportStarted { .. } => "import_started",
            Event::ImportTrackProcessing { .. } => "import_track_processing",
            Event::ImportTrackImported { .. } => "import_track_imported",
            Event::ImportTrackSkipped { .. } => "import_track_skipped",
            Event::ImportStopped { .. } => "import_stopped",
            Event::ImportComplete { .. } => "import_complete",
            Event::ImportError { .. } => "import_error",
        }
    }

    /// The task that issued this event
    pub fn task_id(&self) -> Uuid {
        match self {
            Event::PipelineStarted { task_id, .. }
            | Event::BatchSegmentationStarted { task_id, .. }
            | Event::BatchSegmentationProgress { task_id, .. }
            | Event::BatchSegmentationComplete { task_id, .. }
            | Event::TrackStart { task_id, .. }
            | Event::TrackComplete { task_id, .. }
            | Event::TrackError { task_id, .. }
            | Event::RateLimited { task_id, .. }
            | Event::PipelineStopped { task_id, .. }
            | Event::PipelineComplete { task_id, .. }
            | Event::PipelineError { task_id, .. }
            | Event::ImportFetching { task_id, .. }
            | Event::ImportStarted { task_id, .. }
            | Event::ImportTrackProcessing { task_id, .. }
            | Event::ImportTrackImported { task_id, .. }
            | Event::ImportTrackSkipped { task_id, .. }
            | Event::ImportStopped { task_id, .. }
            | Event::ImportComplete { task_id, .. }
            | Event::ImportError { task_id, .. } => *task_id,
        }
    }

    /// True for events that end a job (exactly one per run)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::PipelineComplete { .. }
                | Event::PipelineStopped { .. }
                | Event::PipelineError { .. }
                | Event::RateLimited { .. }
                | Event::ImportComplete { .. }
                | Event::ImportStopped { .. }
                | Event::ImportError { .. }
        )
    }
}

/// Central event distribution bus
///
/// Built on `tokio::sync::broadcast`: publishing never blocks, each
/// subscriber has a bounded buffer, and a subscriber that falls more than
/// `capacity` events behind loses the oldest events rather than stalling
/// the producer. Per-subscriber delivery order matches emission order for
/// the events actually delivered.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new bus with the given per-subscriber buffer depth
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// Runners use this for every transition: a job must make progress even
    /// with zero connected subscribers.
    pub fn emit_lossy(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("event dropped, no subscribers: {}", e.0.event_type());
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured per-subscriber buffer depth
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
