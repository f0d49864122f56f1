//! Shared fixtures and collaborator stubs for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::Semaphore;
use uuid::Uuid;
use versecut_common::events::Event;

use versecut_pipeline::audio::{
    AcquiredAudio, AudioError, AudioProvider, SlicedSnippet,
};
use versecut_pipeline::db::curated::{self, Track};
use versecut_pipeline::db::ledger;
use versecut_pipeline::embedder::{EmbedError, TextEmbedder};
use versecut_pipeline::index::{IndexError, SearchFilters, SearchHit, SnippetIndex, SnippetPayload};
use versecut_pipeline::lrclib::{LyricsSource, SyncedLyrics};
use versecut_pipeline::pipeline::{SegmentationCache, TrackOutcome, TrackProcessor};
use versecut_pipeline::playlist::{PlaylistLister, PlaylistVideo};
use versecut_pipeline::segmenter::{
    BatchOutcome, BatchSong, BatchedSongResult, LyricsSegmenter, Segment, SegmentError,
    SegmentationOutcome,
};

/// One connection: each pooled `sqlite::memory:` connection is its own db
pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub async fn curated_pool() -> SqlitePool {
    let pool = memory_pool().await;
    curated::initialize_schema(&pool).await.unwrap();
    pool
}

pub async fn ledger_pool() -> SqlitePool {
    let pool = memory_pool().await;
    ledger::initialize_schema(&pool).await.unwrap();
    pool
}

/// LRC text with `lines` timestamped lines, two seconds apart
pub fn sample_lrc(lines: usize) -> String {
    (0..lines)
        .map(|i| {
            let t = 10 + i * 2;
            format!("[{:02}:{:02}.00]lyric line number {}", t / 60, t % 60, i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn video(id: &str, title: &str) -> PlaylistVideo {
    PlaylistVideo {
        video_id: id.to_string(),
        title: title.to_string(),
        uploader: "Some Channel".to_string(),
        duration: 180.0,
        url: format!("https://www.youtube.com/watch?v={id}"),
    }
}

/// Insert `n` curated tracks with eligible lyrics, returning them in order
pub async fn seed_tracks(pool: &SqlitePool, n: usize) -> Vec<Track> {
    let playlist = curated::upsert_playlist(pool, "https://yt/p", "afrobeats", Some("Seed"))
        .await
        .unwrap();
    for i in 0..n {
        curated::insert_track(
            pool,
            playlist,
            &video(&format!("v{i}"), &format!("Artist {i} - Song {i}")),
            &format!("Artist {i}"),
            &format!("Song {i}"),
            Some("Album"),
            180.0,
            &sample_lrc(12),
            "afrobeats",
            i as i64 + 100,
        )
        .await
        .unwrap();
    }
    curated::candidate_tracks(pool, None, None, &Default::default())
        .await
        .unwrap()
}

pub fn make_segment(start: usize, end: usize) -> Segment {
    Segment {
        start_line: start,
        end_line: end,
        lyrics: format!("lines {start}-{end}"),
        ai_description: "Steady warmth building into open joy".to_string(),
        primary_emotion: "joy".to_string(),
        secondary_emotion: None,
        energy: "high".to_string(),
        tone: "celebratory".to_string(),
    }
}

fn segments(count: usize) -> Vec<Segment> {
    (0..count).map(|i| make_segment(2 * i + 1, 2 * i + 2)).collect()
}

/// Scripted segmenter behaviors
pub enum SegmenterScript {
    /// Every track gets this many valid segments
    Segments(usize),
    /// Rate limit on the nth batch call (1-indexed); earlier calls succeed
    RateLimitOnBatchCall { call: usize, retry_after: f64 },
    /// Every single-track call rate limits
    RateLimitSingle { retry_after: f64 },
    /// Every call fails outright
    FailAll,
}

pub struct StubSegmenter {
    pub script: SegmenterScript,
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
}

impl StubSegmenter {
    pub fn new(script: SegmenterScript) -> Self {
        Self {
            script,
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LyricsSegmenter for StubSegmenter {
    async fn segment_one(
        &self,
        _lyrics: &str,
        _title: &str,
        _artist: &str,
    ) -> Result<SegmentationOutcome, SegmentError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            SegmenterScript::Segments(n) => Ok(SegmentationOutcome {
                genre: "afrobeats".to_string(),
                segments: segments(*n),
                provider: "stub".to_string(),
            }),
            SegmenterScript::RateLimitSingle { retry_after } => Err(SegmentError::RateLimited {
                provider: "groq".to_string(),
                retry_after_seconds: *retry_after,
            }),
            SegmenterScript::RateLimitOnBatchCall { .. } => Ok(SegmentationOutcome {
                genre: "afrobeats".to_string(),
                segments: segments(2),
                provider: "stub".to_string(),
            }),
            SegmenterScript::FailAll => {
                Err(SegmentError::Failed("stub failure".to_string()))
            }
        }
    }

    async fn segment_batch(&self, songs: &[BatchSong]) -> Result<BatchOutcome, SegmentError> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.script {
            SegmenterScript::RateLimitOnBatchCall { call: limit_at, retry_after }
                if call == *limit_at =>
            {
                Err(SegmentError::RateLimited {
                    provider: "groq".to_string(),
                    retry_after_seconds: *retry_after,
                })
            }
            SegmenterScript::FailAll => Err(SegmentError::Failed("stub failure".to_string())),
            SegmenterScript::Segments(_) | SegmenterScript::RateLimitOnBatchCall { .. } => {
                let n = match &self.script {
                    SegmenterScript::Segments(n) => *n,
                    _ => 2,
                };
                Ok(BatchOutcome {
                    songs: songs
                        .iter()
                        .enumerate()
                        .map(|(i, song)| BatchedSongResult {
                            track_id: song.track_id,
                            song_index: i + 1,
                            title: song.title.clone(),
                            artist: song.artist.clone(),
                            genre: Some("afrobeats".to_string()),
                            segments: segments(n),
                            error: None,
                        })
                        .collect(),
                    provider: "stub".to_string(),
                })
            }
            SegmenterScript::RateLimitSingle { .. } => Ok(BatchOutcome {
                songs: Vec::new(),
                provider: "stub".to_string(),
            }),
        }
    }
}

/// Acquirer that fabricates files on disk instead of downloading
pub struct StubAcquirer {
    pub dir: PathBuf,
    /// Reported duration of the "downloaded" audio
    pub duration: f64,
    pub fail: bool,
}

impl StubAcquirer {
    pub fn new(dir: &Path, duration: f64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            duration,
            fail: false,
        }
    }

    pub fn audio_path(&self, artist: &str, title: &str) -> PathBuf {
        self.dir.join(format!("{artist} - {title}.mp3"))
    }
}

#[async_trait]
impl AudioProvider for StubAcquirer {
    async fn acquire(
        &self,
        artist: &str,
        title: &str,
        _expected_duration: f64,
    ) -> Result<AcquiredAudio, AudioError> {
        if self.fail {
            return Err(AudioError::NoResults);
        }
        std::fs::create_dir_all(&self.dir)?;
        let file = self.audio_path(artist, title);
        std::fs::write(&file, b"audio")?;
        Ok(AcquiredAudio {
            file,
            duration: Some(self.duration),
            source_url: "https://example.test/watch".to_string(),
            source_title: format!("{artist} - {title} (Official Video)"),
        })
    }

    async fn slice(
        &self,
        _input: &Path,
        _start: f64,
        _end: f64,
        out_name: &str,
    ) -> Result<SlicedSnippet, AudioError> {
        std::fs::create_dir_all(&self.dir)?;
        let file = self.dir.join(format!("{out_name}.opus"));
        std::fs::write(&file, b"opus")?;
        Ok(SlicedSnippet {
            file,
            duration: Some(4.0),
        })
    }
}

/// Deterministic unit-vector embedder
pub struct StubEmbedder {
    pub fail: bool,
}

impl TextEmbedder for StubEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        if self.fail {
            return Err(EmbedError::Inference("stub embed failure".to_string()));
        }
        let mut v = vec![0.0f32; 768];
        v[0] = 1.0;
        Ok(v)
    }

    fn dimension(&self) -> usize {
        768
    }

    fn unload(&self) {}
}

/// In-memory vector index
#[derive(Default)]
pub struct MemoryIndex {
    pub points: Mutex<Vec<(Vec<f32>, SnippetPayload)>>,
}

#[async_trait]
impl SnippetIndex for MemoryIndex {
    async fn ensure_collection(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(
        &self,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<SnippetPayload>,
    ) -> Result<usize, IndexError> {
        if vectors.len() != payloads.len() {
            return Err(IndexError::Mismatch {
                vectors: vectors.len(),
                payloads: payloads.len(),
            });
        }
        let n = vectors.len();
        let mut points = self.points.lock().unwrap();
        points.extend(vectors.into_iter().zip(payloads));
        Ok(n)
    }

    async fn search(
        &self,
        _vector: Vec<f32>,
        limit: usize,
        filters: SearchFilters,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let points = self.points.lock().unwrap();
        Ok(points
            .iter()
            .filter(|(_, p)| {
                filters.energy.as_deref().map_or(true, |e| p.energy == e)
                    && filters
                        .primary_emotion
                        .as_deref()
                        .map_or(true, |e| p.primary_emotion == e)
                    && filters.genre.as_deref().map_or(true, |g| p.genre == g)
            })
            .take(limit)
            .map(|(_, p)| SearchHit {
                snippet_id: p.snippet_id.clone(),
                score: 1.0,
                payload: serde_json::to_value(p).unwrap(),
            })
            .collect())
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.points.lock().unwrap().len() as u64)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        self.points.lock().unwrap().clear();
        Ok(())
    }
}

/// Processor gated on a semaphore so tests control when each track runs
pub struct GatedProcessor {
    pub gate: Semaphore,
    pub processed: AtomicUsize,
}

impl GatedProcessor {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            processed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TrackProcessor for GatedProcessor {
    async fn process(
        &self,
        _track: &Track,
        _cache: Option<&SegmentationCache>,
        _dry_run: bool,
    ) -> anyhow::Result<TrackOutcome> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(TrackOutcome {
            segments_indexed: 1,
            ..TrackOutcome::default()
        })
    }
}

/// Playlist lister serving a fixed video list
pub struct StubLister {
    pub name: String,
    pub videos: Vec<PlaylistVideo>,
}

#[async_trait]
impl PlaylistLister for StubLister {
    async fn playlist_title(&self, _url: &str) -> anyhow::Result<Option<String>> {
        Ok(Some(self.name.clone()))
    }

    async fn list_videos(&self, _url: &str) -> anyhow::Result<Vec<PlaylistVideo>> {
        Ok(self.videos.clone())
    }
}

/// Lyrics source that answers for every query with a fixed-shape result
pub struct StubLyrics {
    /// When false, every lookup misses
    pub found: bool,
}

#[async_trait]
impl LyricsSource for StubLyrics {
    async fn search(
        &self,
        artist: &str,
        title: &str,
        _duration: Option<f64>,
    ) -> anyhow::Result<Option<SyncedLyrics>> {
        if !self.found {
            return Ok(None);
        }
        Ok(Some(SyncedLyrics {
            id: 42,
            track_name: title.to_string(),
            artist_name: artist.to_string(),
            album_name: Some("Album".to_string()),
            duration: 180.0,
            synced_lyrics: sample_lrc(12),
        }))
    }
}

/// Collect events for `task_id` until its terminal event or timeout
pub async fn collect_task_events(
    mut rx: broadcast::Receiver<Event>,
    task_id: Uuid,
) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

    loop {
        let received = tokio::time::timeout_at(deadline, rx.recv()).await;
        match received {
            Ok(Ok(event)) => {
                if event.task_id() != task_id {
                    continue;
                }
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => panic!("timed out waiting for terminal event; got {events:?}"),
        }
    }
    events
}

/// Next event for `task_id`, failing the test after a timeout
pub async fn next_task_event(rx: &mut broadcast::Receiver<Event>, task_id: Uuid) -> Event {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(event)) if event.task_id() == task_id => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("event bus closed"),
            Err(_) => panic!("timed out waiting for an event"),
        }
    }
}

/// Event type names in order
pub fn event_types(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}
