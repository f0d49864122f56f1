//! Per-track processing pipeline
//!
//! Sequential stages for one track: parse lyrics, acquire audio, check the
//! version, segment (from the batch cache when present), slice, upload,
//! embed, and index. Per-segment failures attrite segments; the track only
//! fails when nothing survives.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::audio::{cleanup_audio_file, version_check, AudioProvider};
use crate::db::curated::Track;
use crate::embedder::TextEmbedder;
use crate::index::{SnippetIndex, SnippetPayload};
use crate::lrc::{parse_lrc, ParsedLrc};
use crate::segmenter::{
    normalize_genre, validate_segments, LyricsSegmenter, Segment, SegmentError,
};
use crate::skiplog::{SkipEntry, SkipLog};
use crate::storage::BlobStore;

/// Pre-computed batch segmentation results, keyed by track id
pub type SegmentationCache = HashMap<i64, crate::segmenter::BatchedSongResult>;

/// Rate-limit signal propagated from the segmenter to the runner
#[derive(Debug, Clone)]
pub struct RateLimitHit {
    pub provider: String,
    pub retry_after_seconds: f64,
}

/// Outcome of processing one track
#[derive(Debug, Default)]
pub struct TrackOutcome {
    pub segments_indexed: usize,
    pub errors: Vec<String>,
    /// Set when the LLM rate-limited mid-track; the runner stops the job
    pub rate_limit: Option<RateLimitHit>,
    /// Segmentation data captured during dry runs
    pub dry_run_report: Option<serde_json::Value>,
}

impl TrackOutcome {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }
}

/// Track processing seam used by the pipeline runner
#[async_trait]
pub trait TrackProcessor: Send + Sync {
    async fn process(
        &self,
        track: &Track,
        cache: Option<&SegmentationCache>,
        dry_run: bool,
    ) -> anyhow::Result<TrackOutcome>;
}

/// The real per-track pipeline
pub struct TrackPipeline {
    acquirer: Arc<dyn AudioProvider>,
    segmenter: Arc<dyn LyricsSegmenter>,
    embedder: Arc<dyn TextEmbedder>,
    index: Arc<dyn SnippetIndex>,
    storage: Arc<BlobStore>,
    skiplog: SkipLog,
    duration_tolerance: f64,
}

impl TrackPipeline {
    pub fn new(
        acquirer: Arc<dyn AudioProvider>,
        segmenter: Arc<dyn LyricsSegmenter>,
        embedder: Arc<dyn TextEmbedder>,
        index: Arc<dyn SnippetIndex>,
        storage: Arc<BlobStore>,
        skiplog: SkipLog,
        duration_tolerance: f64,
    ) -> Self {
        Self {
            acquirer,
            segmenter,
            embedder,
            index,
            storage,
            skiplog,
            duration_tolerance,
        }
    }

    fn log_skip(
        &self,
        track: &Track,
        reason: &str,
        audio_duration: Option<f64>,
        drift: Option<f64>,
        source_url: Option<&str>,
        error: Option<&str>,
    ) {
        self.skiplog.record(SkipEntry {
            track_id: track.id,
            title: &track.name,
            artist: &track.artist_name,
            lrc_duration: track.duration,
            audio_duration,
            drift,
            reason,
            source_url,
            error,
            timestamp: String::new(),
        });
    }

    async fn embed_description(&self, description: &str) -> Result<Vec<f32>, String> {
        let embedder = self.embedder.clone();
        let text = description.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| format!("embedding task failed: {e}"))?
            .map_err(|e| e.to_string())
    }

    /// Resolve segments and genre, from the cache when the batch phase
    /// already analyzed this track
    async fn segmentation_for(
        &self,
        track: &Track,
        lrc: &ParsedLrc,
        cache: Option<&SegmentationCache>,
    ) -> Result<(Vec<Segment>, String), SegmentationFailure> {
        if let Some(cached) = cache.and_then(|c| c.get(&track.id)) {
            tracing::debug!(track_id = track.id, "Using cached batch segmentation");
            if cached.error.is_some() || cached.segments.is_empty() {
                let reason = cached
                    .error
                    .clone()
                    .unwrap_or_else(|| "no segments in batch result".to_string());
                return Err(SegmentationFailure::Failed(reason));
            }
            let genre = cached
                .genre
                .clone()
                .unwrap_or_else(|| normalize_genre(None));
            return Ok((cached.segments.clone(), genre));
        }

        match self
            .segmenter
            .segment_one(&lrc.plain_lyrics(), &track.name, &track.artist_name)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    track_id = track.id,
                    segments = outcome.segments.len(),
                    genre = %outcome.genre,
                    provider = %outcome.provider,
                    "Segmentation complete"
                );
                Ok((outcome.segments, outcome.genre))
            }
            Err(SegmentError::RateLimited {
                provider,
                retry_after_seconds,
            }) => Err(SegmentationFailure::RateLimited(RateLimitHit {
                provider,
                retry_after_seconds,
            })),
            Err(SegmentError::Failed(e)) => Err(SegmentationFailure::Failed(e)),
        }
    }
}

enum SegmentationFailure {
    RateLimited(RateLimitHit),
    Failed(String),
}

#[async_trait]
impl TrackProcessor for TrackPipeline {
    async fn process(
        &self,
        track: &Track,
        cache: Option<&SegmentationCache>,
        dry_run: bool,
    ) -> anyhow::Result<TrackOutcome> {
        let mut errors: Vec<String> = Vec::new();

        // 1. Parse lyrics
        let lrc = parse_lrc(&track.synced_lyrics);
        if !lrc.is_eligible() {
            self.log_skip(
                track,
                "too_few_lines",
                None,
                None,
                None,
                Some(&format!("Only {} lines", lrc.total_lines())),
            );
            return Ok(TrackOutcome::failed(vec![format!(
                "Track {}: Too few lyrics lines ({})",
                track.id,
                lrc.total_lines()
            )]));
        }
        tracing::debug!(track_id = track.id, lines = lrc.total_lines(), "Parsed lyrics");

        // 2. Acquire audio
        let acquired = if dry_run {
            None
        } else {
            match self
                .acquirer
                .acquire(&track.artist_name, &track.name, track.duration)
                .await
            {
                Ok(acquired) => Some(acquired),
                Err(e) => {
                    let message = e.to_string();
                    self.log_skip(track, "download_failed", None, None, None, Some(&message));
                    return Ok(TrackOutcome::failed(vec![format!(
                        "Track {}: Download failed - {message}",
                        track.id
                    )]));
                }
            }
        };

        // 3. Version check against the lyrics duration
        if let Some(acquired) = &acquired {
            if let Some(actual) = acquired.duration {
                let (matches, drift) =
                    version_check(track.duration, actual, self.duration_tolerance);
                if !matches {
                    self.log_skip(
                        track,
                        "version_mismatch",
                        Some(actual),
                        Some(drift),
                        Some(&acquired.source_url),
                        None,
                    );
                    cleanup_audio_file(&acquired.file);
                    return Ok(TrackOutcome::failed(vec![format!(
                        "Track {}: Version mismatch (drift: {drift:.1}s)",
                        track.id
                    )]));
                }
            }
        }
        let audio_file = acquired.as_ref().map(|a| a.file.clone());

        // 4. Segmentation, cached or live
        let (segments, genre) = match self.segmentation_for(track, &lrc, cache).await {
            Ok(result) => result,
            Err(SegmentationFailure::RateLimited(hit)) => {
                if let Some(file) = &audio_file {
                    cleanup_audio_file(file);
                }
                return Ok(TrackOutcome {
                    errors: vec![format!(
                        "Rate limited by {}: retry in {:.0}s",
                        hit.provider, hit.retry_after_seconds
                    )],
                    rate_limit: Some(hit),
                    ..TrackOutcome::default()
                });
            }
            Err(SegmentationFailure::Failed(e)) => {
                if let Some(file) = &audio_file {
                    cleanup_audio_file(file);
                }
                self.log_skip(track, "segmentation_failed", None, None, None, Some(&e));
                return Ok(TrackOutcome::failed(vec![format!(
                    "Track {}: Segmentation failed - {e}",
                    track.id
                )]));
            }
        };

        // 5. Validate against the parsed line count
        let (valid_segments, validation_errors) = validate_segments(segments, lrc.total_lines());
        errors.extend(validation_errors);

        if valid_segments.is_empty() {
            if let Some(file) = &audio_file {
                cleanup_audio_file(file);
            }
            errors.push(format!("Track {}: No valid segments", track.id));
            return Ok(TrackOutcome::failed(errors));
        }

        // 6. Slice, upload, embed each surviving segment
        let mut vectors: Vec<Vec<f32>> = Vec::new();
        let mut payloads: Vec<SnippetPayload> = Vec::new();

        for segment in &valid_segments {
            let Some((t_start, t_end)) = lrc.segment_timespan(segment.start_line, segment.end_line)
            else {
                errors.push(format!(
                    "Could not get timestamps for lines {}-{}",
                    segment.start_line, segment.end_line
                ));
                continue;
            };

            let snippet_id = Uuid::new_v4().to_string();

            let snippet_url = if dry_run {
                format!("dry-run://{snippet_id}")
            } else if let Some(file) = &audio_file {
                match self
                    .process_snippet_audio(file, t_start, t_end, &snippet_id)
                    .await
                {
                    Ok(url) => url,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                }
            } else {
                format!("dry-run://{snippet_id}")
            };

            let vector = match self.embed_description(&segment.ai_description).await {
                Ok(vector) => vector,
                Err(e) => {
                    errors.push(format!("Embedding failed: {e}"));
                    continue;
                }
            };

            vectors.push(vector);
            payloads.push(SnippetPayload {
                snippet_id,
                song_title: track.name.clone(),
                artist: track.artist_name.clone(),
                album: track.album_name.clone(),
                lyrics: segment.lyrics.clone(),
                ai_description: segment.ai_description.clone(),
                snippet_url,
                start_time: t_start,
                end_time: t_end,
                primary_emotion: segment.primary_emotion.clone(),
                secondary_emotion: segment.secondary_emotion.clone(),
                energy: segment.energy.clone(),
                tone: segment.tone.clone(),
                genre: genre.clone(),
                track_id: track.id,
            });
        }

        // 7. Index the surviving payloads in one upsert
        let mut segments_indexed = 0;
        if !vectors.is_empty() {
            if dry_run {
                segments_indexed = vectors.len();
            } else {
                match self.index.upsert(vectors, payloads.clone()).await {
                    Ok(indexed) => {
                        segments_indexed = indexed;
                        tracing::info!(track_id = track.id, indexed, "Indexed segments");
                    }
                    Err(e) => errors.push(format!("Indexing failed: {e}")),
                }
            }
        }

        // 8. Full audio file is no longer needed
        if let Some(file) = &audio_file {
            cleanup_audio_file(file);
        }

        let dry_run_report = (dry_run && !valid_segments.is_empty()).then(|| {
            json!({
                "track_id": track.id,
                "title": track.name,
                "artist": track.artist_name,
                "album": track.album_name,
                "duration": track.duration,
                "total_lines": lrc.total_lines(),
                "genre": genre,
                "segments": valid_segments
                    .iter()
                    .map(|seg| {
                        json!({
                            "start_line": seg.start_line,
                            "end_line": seg.end_line,
                            "lyrics": seg.lyrics,
                            "ai_description": seg.ai_description,
                            "primary_emotion": seg.primary_emotion,
                            "secondary_emotion": seg.secondary_emotion,
                            "energy": seg.energy,
                            "tone": seg.tone,
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        });

        Ok(TrackOutcome {
            segments_indexed,
            errors,
            rate_limit: None,
            dry_run_report,
        })
    }
}

impl TrackPipeline {
    /// Slice one snippet and move it to its final home
    ///
    /// With a configured blob store the local slice is uploaded then
    /// deleted; otherwise the local path doubles as the snippet URL.
    async fn process_snippet_audio(
        &self,
        audio_file: &Path,
        t_start: f64,
        t_end: f64,
        snippet_id: &str,
    ) -> Result<String, String> {
        let sliced = self
            .acquirer
            .slice(audio_file, t_start, t_end, snippet_id)
            .await
            .map_err(|e| format!("Slice failed: {e}"))?;

        if !self.storage.is_configured() {
            return Ok(sliced.file.display().to_string());
        }

        match self
            .storage
            .upload(&sliced.file, snippet_id, "audio/opus")
            .await
        {
            Ok(url) => {
                cleanup_audio_file(&sliced.file);
                Ok(url)
            }
            Err(e) => {
                cleanup_audio_file(&sliced.file);
                Err(format!("Upload failed: {e}"))
            }
        }
    }
}
