//! Playlist import runner
//!
//! Resolves a playlist's videos into curated tracks: parse artist/title
//! from each video title, look up synced lyrics, and insert under the
//! normalized song key. Emits one event per video; duplicates and parse
//! failures are skips, never fatal.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use versecut_common::events::{Event, EventBus};

use crate::db::curated::{self, CuratedError};
use crate::lrclib::LyricsSource;
use crate::playlist::{PlaylistLister, PlaylistVideo};
use crate::runner::{push_error, RunnerError};
use crate::titles::{parse_video_title, strip_topic_suffix};

/// Import start parameters
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub playlist_url: String,
    pub genre: String,
    pub dry_run: bool,
}

/// Progress counters surfaced in status
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportProgress {
    pub total_videos: usize,
    pub processed: usize,
    pub imported: usize,
    pub skipped: usize,
}

/// Runner status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ImportStatus {
    pub running: bool,
    pub task_id: Option<Uuid>,
    pub playlist_name: Option<String>,
    pub current_track: Option<serde_json::Value>,
    pub progress: ImportProgress,
    pub errors: Vec<String>,
}

#[derive(Default)]
struct JobState {
    running: bool,
    task_id: Option<Uuid>,
    playlist_name: Option<String>,
    current_track: Option<serde_json::Value>,
    progress: ImportProgress,
    errors: Vec<String>,
    cancel: Option<CancellationToken>,
}

/// Import runner singleton
pub struct ImportRunner {
    state: Mutex<JobState>,
    bus: EventBus,
    curated: SqlitePool,
    lister: Arc<dyn PlaylistLister>,
    lyrics: Arc<dyn LyricsSource>,
}

fn truncated(title: &str) -> String {
    title.chars().take(80).collect()
}

impl ImportRunner {
    pub fn new(
        bus: EventBus,
        curated: SqlitePool,
        lister: Arc<dyn PlaylistLister>,
        lyrics: Arc<dyn LyricsSource>,
    ) -> Self {
        Self {
            state: Mutex::new(JobState::default()),
            bus,
            curated,
            lister,
            lyrics,
        }
    }

    /// Start an import job; the total video count arrives via events once
    /// the playlist is fetched
    pub fn start(self: &Arc<Self>, request: ImportRequest) -> Result<Uuid, RunnerError> {
        let (task_id, cancel) = {
            let mut state = self.state.lock().expect("import state lock");
            if state.running {
                return Err(RunnerError::Busy("Import is already running".to_string()));
            }
            let task_id = Uuid::new_v4();
            let cancel = CancellationToken::new();
            *state = JobState {
                running: true,
                task_id: Some(task_id),
                cancel: Some(cancel.clone()),
                ..JobState::default()
            };
            (task_id, cancel)
        };

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(task_id = %task_id, url = %request.playlist_url, "Import job started");
            if let Err(e) = runner.run(task_id, &request, cancel).await {
                tracing::error!(task_id = %task_id, error = %e, "Import job failed");
                {
                    let mut state = runner.state.lock().expect("import state lock");
                    push_error(&mut state.errors, e.to_string());
                }
                runner.bus.emit_lossy(Event::ImportError {
                    task_id,
                    error: e.to_string(),
                });
            }
            let mut state = runner.state.lock().expect("import state lock");
            state.running = false;
            state.current_track = None;
        });

        Ok(task_id)
    }

    /// Request a cooperative stop; `false` when nothing is running
    pub fn stop(&self) -> bool {
        let state = self.state.lock().expect("import state lock");
        if !state.running {
            return false;
        }
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
        true
    }

    /// Current status snapshot
    pub fn status(&self) -> ImportStatus {
        let state = self.state.lock().expect("import state lock");
        ImportStatus {
            running: state.running,
            task_id: state.task_id,
            playlist_name: state.playlist_name.clone(),
            current_track: state.current_track.clone(),
            progress: state.progress.clone(),
            errors: state.errors.clone(),
        }
    }

    async fn run(
        &self,
        task_id: Uuid,
        request: &ImportRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        self.bus.emit_lossy(Event::ImportFetching {
            task_id,
            playlist_url: request.playlist_url.clone(),
        });

        let playlist_title = self.lister.playlist_title(&request.playlist_url).await?;
        let videos = self.lister.list_videos(&request.playlist_url).await?;
        let playlist_name = playlist_title.unwrap_or_else(|| "Unknown Playlist".to_string());

        {
            let mut state = self.state.lock().expect("import state lock");
            state.playlist_name = Some(playlist_name.clone());
            state.progress.total_videos = videos.len();
        }

        self.bus.emit_lossy(Event::ImportStarted {
            task_id,
            playlist_name: playlist_name.clone(),
            total_videos: videos.len(),
            genre: request.genre.clone(),
        });

        let playlist_id = if request.dry_run {
            0
        } else {
            curated::upsert_playlist(
                &self.curated,
                &request.playlist_url,
                &request.genre,
                Some(&playlist_name),
            )
            .await?
        };

        for (i, video) in videos.iter().enumerate() {
            if cancel.is_cancelled() {
                self.bus.emit_lossy(Event::ImportStopped {
                    task_id,
                    reason: "user_requested".to_string(),
                });
                return Ok(());
            }

            let index = i + 1;
            {
                let mut state = self.state.lock().expect("import state lock");
                state.current_track = Some(serde_json::json!({
                    "index": index,
                    "total": videos.len(),
                    "video_title": truncated(&video.title),
                    "video_id": video.video_id,
                }));
            }

            self.bus.emit_lossy(Event::ImportTrackProcessing {
                task_id,
                index,
                total: videos.len(),
                video_title: truncated(&video.title),
                stage: "parsing".to_string(),
            });

            self.import_video(task_id, request, playlist_id, index, videos.len(), video)
                .await?;

            {
                let mut state = self.state.lock().expect("import state lock");
                state.progress.processed += 1;
            }
        }

        let progress = {
            let state = self.state.lock().expect("import state lock");
            state.progress.clone()
        };
        self.bus.emit_lossy(Event::ImportComplete {
            task_id,
            playlist_name,
            total_videos: progress.total_videos,
            imported: progress.imported,
            skipped: progress.skipped,
        });
        tracing::info!(
            task_id = %task_id,
            imported = progress.imported,
            skipped = progress.skipped,
            "Import job complete"
        );

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn skip_video(
        &self,
        task_id: Uuid,
        request: &ImportRequest,
        playlist_id: i64,
        index: usize,
        video: &PlaylistVideo,
        artist: &str,
        title: &str,
        row_reason: &str,
        event_reason: &str,
        persist: bool,
    ) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().expect("import state lock");
            state.progress.skipped += 1;
        }
        if persist && !request.dry_run {
            curated::insert_skipped(&self.curated, playlist_id, video, artist, title, row_reason)
                .await?;
        }
        self.bus.emit_lossy(Event::ImportTrackSkipped {
            task_id,
            index,
            video_title: truncated(&video.title),
            reason: event_reason.to_string(),
        });
        Ok(())
    }

    async fn import_video(
        &self,
        task_id: Uuid,
        request: &ImportRequest,
        playlist_id: i64,
        index: usize,
        total: usize,
        video: &PlaylistVideo,
    ) -> anyhow::Result<()> {
        // Parse artist and song from the video title, falling back to the
        // uploader for auto-generated channels
        let (mut artist, song_name) = parse_video_title(&video.title);
        if artist.is_empty() && !song_name.is_empty() {
            artist = strip_topic_suffix(&video.uploader);
        }

        if artist.is_empty() || song_name.is_empty() {
            return self
                .skip_video(
                    task_id,
                    request,
                    playlist_id,
                    index,
                    video,
                    &artist,
                    &song_name,
                    "parse_failed",
                    "parse_failed",
                    true,
                )
                .await;
        }

        self.bus.emit_lossy(Event::ImportTrackProcessing {
            task_id,
            index,
            total,
            video_title: truncated(&video.title),
            stage: "searching_lyrics".to_string(),
        });

        let duration_hint = (video.duration > 0.0).then_some(video.duration);
        let lyrics = match self.lyrics.search(&artist, &song_name, duration_hint).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(artist = %artist, title = %song_name, error = %e, "Lyrics lookup failed");
                None
            }
        };

        let Some(lyrics) = lyrics else {
            return self
                .skip_video(
                    task_id,
                    request,
                    playlist_id,
                    index,
                    video,
                    &artist,
                    &song_name,
                    "no_lyrics",
                    "no_lyrics",
                    true,
                )
                .await;
        };

        if request.dry_run {
            let mut state = self.state.lock().expect("import state lock");
            state.progress.imported += 1;
            drop(state);
            self.bus.emit_lossy(Event::ImportTrackImported {
                task_id,
                index,
                artist: lyrics.artist_name,
                title: lyrics.track_name,
                video_title: truncated(&video.title),
                dry_run: true,
            });
            return Ok(());
        }

        match curated::insert_track(
            &self.curated,
            playlist_id,
            video,
            &lyrics.artist_name,
            &lyrics.track_name,
            lyrics.album_name.as_deref(),
            lyrics.duration,
            &lyrics.synced_lyrics,
            &request.genre,
            lyrics.id,
        )
        .await
        {
            Ok(()) => {
                let mut state = self.state.lock().expect("import state lock");
                state.progress.imported += 1;
                drop(state);
                self.bus.emit_lossy(Event::ImportTrackImported {
                    task_id,
                    index,
                    artist: lyrics.artist_name,
                    title: lyrics.track_name,
                    video_title: truncated(&video.title),
                    dry_run: false,
                });
                Ok(())
            }
            Err(CuratedError::DuplicateVideo(_)) => {
                self.skip_video(
                    task_id,
                    request,
                    playlist_id,
                    index,
                    video,
                    &artist,
                    &song_name,
                    "duplicate_video",
                    "Already imported (same video)",
                    false,
                )
                .await
            }
            Err(CuratedError::DuplicateSong(_)) => {
                self.skip_video(
                    task_id,
                    request,
                    playlist_id,
                    index,
                    video,
                    &artist,
                    &song_name,
                    "duplicate_song",
                    "Already curated (different video)",
                    false,
                )
                .await
            }
            Err(CuratedError::Db(e)) => Err(e.into()),
        }
    }
}
