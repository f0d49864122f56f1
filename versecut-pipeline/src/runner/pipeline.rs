//! Pipeline job runner
//!
//! Job-level state machine over many tracks. Phase 1 segments lyrics in
//! batched LLM calls; Phase 2 runs the per-track pipeline and writes the
//! ledger. A provider rate limit terminates the job cleanly without
//! ledgering the unreached tracks, and a stop request takes effect between
//! tracks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use versecut_common::events::{Event, EventBus};

use crate::db::curated::{self, Track};
use crate::db::ledger::{Ledger, TrackStatus};
use crate::lrc::parse_lrc;
use crate::pipeline::{SegmentationCache, TrackProcessor};
use crate::runner::{push_error, RunnerError};
use crate::segmenter::{BatchSong, BatchedSongResult, LyricsSegmenter, SegmentError};

/// Canonical source; "lrclib" is accepted but reserved
pub const SOURCE_CURATED: &str = "curated";
pub const SOURCE_LRCLIB: &str = "lrclib";

/// Pipeline start parameters
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub source: String,
    pub genre: Option<String>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub reprocess: bool,
}

/// Progress counters surfaced in status
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineProgress {
    pub processed: usize,
    pub skipped: usize,
    pub total: usize,
    pub segments_indexed: usize,
}

/// Runner status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub task_id: Option<Uuid>,
    pub current_track: Option<serde_json::Value>,
    pub progress: PipelineProgress,
    /// Most recent errors, bounded
    pub errors: Vec<String>,
}

#[derive(Default)]
struct JobState {
    running: bool,
    task_id: Option<Uuid>,
    current_track: Option<serde_json::Value>,
    progress: PipelineProgress,
    errors: Vec<String>,
    cancel: Option<CancellationToken>,
}

/// Pipeline runner singleton
pub struct PipelineRunner {
    state: Mutex<JobState>,
    bus: EventBus,
    curated: SqlitePool,
    ledger: Ledger,
    segmenter: Arc<dyn LyricsSegmenter>,
    processor: Arc<dyn TrackProcessor>,
    batch_size: usize,
    enable_batch: bool,
    logs_dir: PathBuf,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        curated: SqlitePool,
        ledger: Ledger,
        segmenter: Arc<dyn LyricsSegmenter>,
        processor: Arc<dyn TrackProcessor>,
        batch_size: usize,
        enable_batch: bool,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            state: Mutex::new(JobState::default()),
            bus,
            curated,
            ledger,
            segmenter,
            processor,
            batch_size: batch_size.max(1),
            enable_batch,
            logs_dir,
        }
    }

    /// Start a pipeline job
    ///
    /// Rejects with [`RunnerError::Busy`] while a job is in flight. The
    /// candidate list is resolved up front (ledgered tracks excluded unless
    /// reprocessing) and the background task is detached; the returned
    /// total is the number of tracks the job will attempt.
    pub async fn start(self: &Arc<Self>, request: PipelineRequest) -> Result<(Uuid, usize), RunnerError> {
        let tracks = self.candidates(&request).await?;
        let total = tracks.len();

        let (task_id, cancel) = {
            let mut state = self.state.lock().expect("pipeline state lock");
            if state.running {
                return Err(RunnerError::Busy("Pipeline is already running".to_string()));
            }
            let task_id = Uuid::new_v4();
            let cancel = CancellationToken::new();
            *state = JobState {
                running: true,
                task_id: Some(task_id),
                current_track: None,
                progress: PipelineProgress {
                    total,
                    ..PipelineProgress::default()
                },
                errors: Vec::new(),
                cancel: Some(cancel.clone()),
            };
            (task_id, cancel)
        };

        self.bus.emit_lossy(Event::PipelineStarted {
            task_id,
            source: request.source.clone(),
            total_tracks: total,
            dry_run: request.dry_run,
        });

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(task_id = %task_id, total, "Pipeline job started");
            if let Err(e) = runner.run(task_id, tracks, &request, cancel).await {
                tracing::error!(task_id = %task_id, error = %e, "Pipeline job failed");
                runner.bus.emit_lossy(Event::PipelineError {
                    task_id,
                    error: e.to_string(),
                });
            }
            let mut state = runner.state.lock().expect("pipeline state lock");
            state.running = false;
            state.current_track = None;
        });

        Ok((task_id, total))
    }

    /// Request a cooperative stop; `false` when nothing is running
    pub fn stop(&self) -> bool {
        let state = self.state.lock().expect("pipeline state lock");
        if !state.running {
            return false;
        }
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
        true
    }

    /// Current status snapshot, errors bounded to the most recent
    pub fn status(&self) -> PipelineStatus {
        let state = self.state.lock().expect("pipeline state lock");
        PipelineStatus {
            running: state.running,
            task_id: state.task_id,
            current_track: state.current_track.clone(),
            progress: state.progress.clone(),
            errors: state.errors.clone(),
        }
    }

    async fn candidates(&self, request: &PipelineRequest) -> Result<Vec<Track>, RunnerError> {
        match request.source.as_str() {
            SOURCE_CURATED => {
                let exclude = if request.reprocess {
                    Default::default()
                } else {
                    self.ledger
                        .processed_ids(SOURCE_CURATED)
                        .await
                        .map_err(|e| RunnerError::Other(e.into()))?
                };
                curated::candidate_tracks(
                    &self.curated,
                    request.genre.as_deref(),
                    request.limit,
                    &exclude,
                )
                .await
                .map_err(|e| RunnerError::Other(e.into()))
            }
            // Reserved: accepted, but no implementation path yet
            SOURCE_LRCLIB => Ok(Vec::new()),
            other => Err(RunnerError::InvalidRequest(format!(
                "Unknown source: {other}"
            ))),
        }
    }

    fn is_cancelled(&self, cancel: &CancellationToken, task_id: Uuid) -> bool {
        if cancel.is_cancelled() {
            self.bus.emit_lossy(Event::PipelineStopped {
                task_id,
                reason: "user_requested".to_string(),
            });
            return true;
        }
        false
    }

    async fn run(
        &self,
        task_id: Uuid,
        tracks: Vec<Track>,
        request: &PipelineRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        // Phase 1: batched segmentation
        let mut cache: SegmentationCache = SegmentationCache::new();
        if self.enable_batch && !tracks.is_empty() {
            let total_batches = tracks.len().div_ceil(self.batch_size);
            self.bus.emit_lossy(Event::BatchSegmentationStarted {
                task_id,
                total_tracks: tracks.len(),
                batch_size: self.batch_size,
                total_batches,
            });

            for (batch_index, chunk) in tracks.chunks(self.batch_size).enumerate() {
                if self.is_cancelled(&cancel, task_id) {
                    return Ok(());
                }

                let songs: Vec<BatchSong> = chunk
                    .iter()
                    .filter_map(|track| {
                        let lrc = parse_lrc(&track.synced_lyrics);
                        lrc.is_eligible().then(|| BatchSong {
                            lyrics: lrc.plain_lyrics(),
                            title: track.name.clone(),
                            artist: track.artist_name.clone(),
                            track_id: track.id,
                        })
                    })
                    .collect();

                if songs.is_empty() {
                    continue;
                }

                match self.segmenter.segment_batch(&songs).await {
                    Ok(outcome) => {
                        let segmented =
                            outcome.songs.iter().filter(|s| !s.segments.is_empty()).count();
                        let failed = outcome.songs.iter().filter(|s| s.error.is_some()).count();
                        for song in outcome.songs {
                            cache.insert(song.track_id, song);
                        }
                        self.bus.emit_lossy(Event::BatchSegmentationProgress {
                            task_id,
                            batch: batch_index + 1,
                            total_batches,
                            segmented,
                            failed,
                        });
                    }
                    Err(SegmentError::RateLimited {
                        provider,
                        retry_after_seconds,
                    }) => {
                        // Stop cleanly: no further tracks, no ledger writes
                        // for the untouched remainder
                        self.bus.emit_lossy(Event::RateLimited {
                            task_id,
                            provider: Some(provider),
                            retry_after_seconds,
                        });
                        return Ok(());
                    }
                    Err(SegmentError::Failed(e)) => {
                        // The whole batch failed; record per-track errors so
                        // Phase 2 skips these without re-calling the LLM
                        tracing::warn!(batch = batch_index + 1, error = %e, "Batch call failed");
                        for (i, song) in songs.iter().enumerate() {
                            cache.insert(
                                song.track_id,
                                BatchedSongResult {
                                    track_id: song.track_id,
                                    song_index: i + 1,
                                    title: song.title.clone(),
                                    artist: song.artist.clone(),
                                    genre: None,
                                    segments: Vec::new(),
                                    error: Some(format!("Batch API call failed: {e}")),
                                },
                            );
                        }
                        self.bus.emit_lossy(Event::BatchSegmentationProgress {
                            task_id,
                            batch: batch_index + 1,
                            total_batches,
                            segmented: 0,
                            failed: songs.len(),
                        });
                    }
                }
            }

            self.bus.emit_lossy(Event::BatchSegmentationComplete {
                task_id,
                cached_tracks: cache.len(),
            });
        }

        // Phase 2: per-track processing
        let mut dry_run_reports: Vec<serde_json::Value> = Vec::new();
        let total = tracks.len();

        for (i, track) in tracks.iter().enumerate() {
            if self.is_cancelled(&cancel, task_id) {
                return Ok(());
            }

            let snapshot = serde_json::json!({
                "id": track.id,
                "title": track.name,
                "artist": track.artist_name,
                "index": i + 1,
                "total": total,
            });
            {
                let mut state = self.state.lock().expect("pipeline state lock");
                state.current_track = Some(snapshot);
            }

            self.bus.emit_lossy(Event::TrackStart {
                task_id,
                track_id: track.id,
                title: track.name.clone(),
                artist: track.artist_name.clone(),
                index: i + 1,
                total,
            });

            let cache_arg = self.enable_batch.then_some(&cache);
            match self.processor.process(track, cache_arg, request.dry_run).await {
                Ok(outcome) => {
                    if let Some(hit) = outcome.rate_limit {
                        self.bus.emit_lossy(Event::RateLimited {
                            task_id,
                            provider: Some(hit.provider),
                            retry_after_seconds: hit.retry_after_seconds,
                        });
                        return Ok(());
                    }

                    if let Some(report) = outcome.dry_run_report {
                        dry_run_reports.push(report);
                    }

                    let indexed = outcome.segments_indexed;
                    {
                        let mut state = self.state.lock().expect("pipeline state lock");
                        for error in &outcome.errors {
                            push_error(&mut state.errors, error.clone());
                        }
                        if indexed > 0 {
                            state.progress.processed += 1;
                            state.progress.segments_indexed += indexed;
                        } else {
                            state.progress.skipped += 1;
                        }
                    }

                    if indexed > 0 {
                        if !request.dry_run {
                            self.ledger
                                .mark_processed(
                                    &request.source,
                                    track.id,
                                    TrackStatus::Success,
                                    None,
                                )
                                .await?;
                        }
                        self.bus.emit_lossy(Event::TrackComplete {
                            task_id,
                            track_id: track.id,
                            segments_indexed: indexed,
                            dry_run: request.dry_run,
                        });
                    } else {
                        if !request.dry_run {
                            self.ledger
                                .mark_processed(
                                    &request.source,
                                    track.id,
                                    TrackStatus::Failed,
                                    Some(&outcome.errors.join("; ")),
                                )
                                .await?;
                        }
                        self.bus.emit_lossy(Event::TrackError {
                            task_id,
                            track_id: track.id,
                            errors: outcome.errors,
                        });
                    }
                }
                Err(e) => {
                    // Unhandled per-track failure: ledger it and continue
                    let message = format!("{}: {e}", track.name);
                    tracing::error!(track_id = track.id, error = %e, "Track processing failed");
                    {
                        let mut state = self.state.lock().expect("pipeline state lock");
                        state.progress.skipped += 1;
                        push_error(&mut state.errors, message.clone());
                    }
                    if !request.dry_run {
                        self.ledger
                            .mark_processed(
                                &request.source,
                                track.id,
                                TrackStatus::Failed,
                                Some(&e.to_string()),
                            )
                            .await?;
                    }
                    self.bus.emit_lossy(Event::TrackError {
                        task_id,
                        track_id: track.id,
                        errors: vec![message],
                    });
                }
            }
        }

        if request.dry_run && !dry_run_reports.is_empty() {
            self.save_dry_run_reports(&dry_run_reports);
        }

        let progress = {
            let state = self.state.lock().expect("pipeline state lock");
            state.progress.clone()
        };
        self.bus.emit_lossy(Event::PipelineComplete {
            task_id,
            processed: progress.processed,
            skipped: progress.skipped,
            segments_indexed: progress.segments_indexed,
        });
        tracing::info!(
            task_id = %task_id,
            processed = progress.processed,
            skipped = progress.skipped,
            segments_indexed = progress.segments_indexed,
            "Pipeline job complete"
        );

        Ok(())
    }

    fn save_dry_run_reports(&self, reports: &[serde_json::Value]) {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.logs_dir.join(format!("segmentation_results_{stamp}.json"));

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.logs_dir)?;
            let body = serde_json::to_vec_pretty(reports).unwrap_or_default();
            std::fs::write(&path, body)
        };
        match write() {
            Ok(()) => tracing::info!(path = %path.display(), "Saved dry-run segmentation report"),
            Err(e) => tracing::warn!(error = %e, "Failed to save dry-run report"),
        }
    }
}
