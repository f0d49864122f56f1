//! Audio acquisition and slicing
//!
//! Searches an external media index (yt-dlp) for candidates matching an
//! expected track, scores them against title/artist/duration, downloads the
//! best match, and slices snippet byte ranges with ffmpeg. Every subprocess
//! call runs under a hard timeout; a timeout is a recoverable per-stage
//! failure, never a crash.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::{AudioConfig, Config};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(90);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const SLICE_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

const YTDLP_FORMAT: &str = "bestaudio/best";

/// Uploader substrings that suggest an official channel
const OFFICIAL_KEYWORDS: &[&str] = &["official", "vevo", "records", "music", "topic"];

/// Acquisition / slicing failure
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{0}")]
    CommandFailed(String),

    #[error("No search results found")]
    NoResults,

    #[error("No good match (best score: {best_score:.0} < {threshold:.0}). Candidates: {alternatives}")]
    NoMatch {
        best_score: f64,
        threshold: f64,
        alternatives: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A search result candidate
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub video_id: String,
    pub title: String,
    pub uploader: String,
    pub duration: f64,
    pub url: String,
    pub score: f64,
}

/// Successfully downloaded full-track audio
#[derive(Debug, Clone)]
pub struct AcquiredAudio {
    pub file: PathBuf,
    /// Container duration, when the probe succeeded
    pub duration: Option<f64>,
    pub source_url: String,
    pub source_title: String,
}

/// A sliced snippet file
#[derive(Debug, Clone)]
pub struct SlicedSnippet {
    pub file: PathBuf,
    pub duration: Option<f64>,
}

/// Audio acquisition seam used by the track pipeline
#[async_trait]
pub trait AudioProvider: Send + Sync {
    /// Search, score, and download the best match for the expected track
    async fn acquire(
        &self,
        artist: &str,
        title: &str,
        expected_duration: f64,
    ) -> Result<AcquiredAudio, AudioError>;

    /// Extract `[start, end)` into an opus snippet named `out_name`
    async fn slice(
        &self,
        input: &Path,
        start: f64,
        end: f64,
        out_name: &str,
    ) -> Result<SlicedSnippet, AudioError>;
}

/// Check whether the acquired audio is the same version as the lyrics
///
/// Returns `(within_tolerance, drift_seconds)`.
pub fn version_check(expected: f64, actual: f64, tolerance: f64) -> (bool, f64) {
    let drift = (expected - actual).abs();
    (drift <= tolerance, drift)
}

/// Approximate containment check
///
/// Exact case-insensitive substring first; otherwise each needle word must
/// fuzzy-match some haystack word (character similarity > 0.7) and at least
/// 70% of needle words must match.
pub fn fuzzy_contains(haystack: &str, needle: &str) -> bool {
    let haystack = haystack.to_lowercase();
    let needle = needle.to_lowercase();

    if haystack.contains(&needle) {
        return true;
    }

    let needle_words: Vec<&str> = needle.split_whitespace().collect();
    let haystack_words: Vec<&str> = haystack.split_whitespace().collect();
    if needle_words.is_empty() {
        return false;
    }

    let matched = needle_words
        .iter()
        .filter(|nw| {
            haystack_words
                .iter()
                .any(|hw| strsim::normalized_levenshtein(nw, hw) > 0.7)
        })
        .count();

    matched as f64 / needle_words.len() as f64 >= 0.7
}

/// Score a candidate against the expected track (higher is better)
///
/// Title +50, artist in title +40 / in uploader +30, anti-cover penalty -30
/// when the title matches but no artist signal does, duration drift graded
/// +20/+10/+5/-20, official-channel uploader +10.
pub fn score_candidate(
    candidate: &SearchCandidate,
    expected_title: &str,
    expected_artist: &str,
    expected_duration: f64,
) -> f64 {
    let mut score = 0.0;
    let mut title_matched = false;
    let mut artist_matched = false;

    if fuzzy_contains(&candidate.title, expected_title) {
        score += 50.0;
        title_matched = true;
    }

    if fuzzy_contains(&candidate.title, expected_artist) {
        score += 40.0;
        artist_matched = true;
    } else if fuzzy_contains(&candidate.uploader, expected_artist) {
        score += 30.0;
        artist_matched = true;
    }

    // A matching title with no artist signal is how covers win
    if title_matched && !artist_matched {
        score -= 30.0;
    }

    let drift = (candidate.duration - expected_duration).abs();
    if drift <= 1.0 {
        score += 20.0;
    } else if drift <= 2.0 {
        score += 10.0;
    } else if drift <= 5.0 {
        score += 5.0;
    } else {
        score -= 20.0;
    }

    let uploader = candidate.uploader.to_lowercase();
    if OFFICIAL_KEYWORDS.iter().any(|kw| uploader.contains(kw)) {
        score += 10.0;
    }

    score
}

async fn run_command(
    cmd: &mut Command,
    timeout: Duration,
    what: &'static str,
) -> Result<std::process::Output, AudioError> {
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AudioError::Timeout(what)),
    }
}

/// Read container duration via ffprobe
pub async fn probe_duration(file: &Path) -> Option<f64> {
    let output = run_command(
        Command::new("ffprobe").args([
            "-v",
            "quiet",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(file),
        PROBE_TIMEOUT,
        "ffprobe",
    )
    .await
    .ok()?;

    if !output.status.success() {
        return None;
    }

    let data: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    data["format"]["duration"].as_str()?.parse().ok()
}

/// yt-dlp/ffmpeg backed acquirer
pub struct YtDlpAcquirer {
    audio_dir: PathBuf,
    snippets_dir: PathBuf,
    cfg: AudioConfig,
}

impl YtDlpAcquirer {
    pub fn new(config: &Config) -> Self {
        Self {
            audio_dir: config.audio_dir(),
            snippets_dir: config.snippets_dir(),
            cfg: config.audio.clone(),
        }
    }

    fn safe_name(artist: &str, title: &str) -> String {
        format!("{artist} - {title}")
            .replace(['/', '\\'], "_")
            .chars()
            .take(100)
            .collect()
    }

    /// One yt-dlp metadata search; failures fall back to the next query
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, AudioError> {
        let search_spec = format!("ytsearch{}:{}", self.cfg.search_results, query);
        tracing::debug!(query = %query, "Searching for audio candidates");

        let output = run_command(
            Command::new("yt-dlp").args([
                "--dump-json",
                "--no-download",
                "-f",
                YTDLP_FORMAT,
                search_spec.as_str(),
            ]),
            SEARCH_TIMEOUT,
            "search",
        )
        .await?;

        if !output.status.success() {
            return Err(AudioError::CommandFailed(format!(
                "yt-dlp search failed: {}",
                String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(200)
                    .collect::<String>()
            )));
        }

        let mut candidates = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(info) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };

            let video_id = info["id"].as_str().unwrap_or_default().to_string();
            let url = info["webpage_url"]
                .as_str()
                .or_else(|| info["url"].as_str())
                .unwrap_or_default()
                .to_string();
            candidates.push(SearchCandidate {
                video_id,
                title: info["title"].as_str().unwrap_or_default().to_string(),
                uploader: info["uploader"]
                    .as_str()
                    .or_else(|| info["channel"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                duration: info["duration"].as_f64().unwrap_or(0.0),
                url,
                score: 0.0,
            });
        }

        Ok(candidates)
    }

    async fn download(&self, url: &str, safe_name: &str) -> Result<PathBuf, AudioError> {
        let template = self.audio_dir.join(format!("{safe_name}.%(ext)s"));
        tracing::debug!(url = %url, "Downloading best match");

        let output = run_command(
            Command::new("yt-dlp")
                .args(["-f", YTDLP_FORMAT, "-x", "--audio-format", "mp3"])
                .args(["--audio-quality", "0"])
                .arg("-o")
                .arg(&template)
                .args(["--no-playlist", "--no-warnings", url]),
            DOWNLOAD_TIMEOUT,
            "download",
        )
        .await?;

        if !output.status.success() {
            return Err(AudioError::CommandFailed(format!(
                "yt-dlp download failed: {}",
                String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(200)
                    .collect::<String>()
            )));
        }

        // yt-dlp fills in the extension; find what it produced
        let prefix = format!("{safe_name}.");
        let mut entries = std::fs::read_dir(&self.audio_dir)?;
        let found = entries.find_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with(&prefix).then(|| entry.path())
        });

        found.ok_or_else(|| {
            AudioError::CommandFailed("Download completed but file not found".to_string())
        })
    }
}

#[async_trait]
impl AudioProvider for YtDlpAcquirer {
    async fn acquire(
        &self,
        artist: &str,
        title: &str,
        expected_duration: f64,
    ) -> Result<AcquiredAudio, AudioError> {
        // Query variants in order of specificity; "official audio" style
        // qualifiers are deliberately absent, they bias toward popular songs
        let queries = [
            format!("{artist} {title}"),
            format!("{artist} - {title}"),
            format!("{title} {artist}"),
        ];

        let mut candidates: Vec<SearchCandidate> = Vec::new();

        for query in &queries {
            let found = match self.search(query).await {
                Ok(found) => found,
                Err(AudioError::Timeout(what)) => return Err(AudioError::Timeout(what)),
                Err(e) => {
                    tracing::debug!(error = %e, "Search query failed, trying next");
                    continue;
                }
            };

            for mut candidate in found {
                if candidates.iter().any(|c| c.video_id == candidate.video_id) {
                    continue;
                }
                if candidate.duration == 0.0 {
                    // Metadata had no duration; assume a match for scoring
                    candidate.duration = expected_duration;
                }
                candidate.score =
                    score_candidate(&candidate, title, artist, expected_duration);
                candidates.push(candidate);
            }

            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            if candidates
                .first()
                .is_some_and(|best| best.score >= self.cfg.match_threshold)
            {
                break;
            }
        }

        let Some(best) = candidates.first().cloned() else {
            return Err(AudioError::NoResults);
        };

        tracing::info!(title = %best.title, score = best.score, "Best candidate");

        if best.score < self.cfg.match_threshold {
            let alternatives = candidates
                .iter()
                .take(3)
                .map(|c| format!("\"{}\" ({:.0})", c.title, c.score))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AudioError::NoMatch {
                best_score: best.score,
                threshold: self.cfg.match_threshold,
                alternatives,
            });
        }

        let safe_name = Self::safe_name(artist, title);
        let file = self.download(&best.url, &safe_name).await?;
        let duration = probe_duration(&file).await;

        Ok(AcquiredAudio {
            file,
            duration,
            source_url: best.url,
            source_title: best.title,
        })
    }

    async fn slice(
        &self,
        input: &Path,
        start: f64,
        end: f64,
        out_name: &str,
    ) -> Result<SlicedSnippet, AudioError> {
        let output_file = self
            .snippets_dir
            .join(format!("{out_name}.{}", self.cfg.snippet_format));

        let output = run_command(
            Command::new("ffmpeg")
                .arg("-y")
                .arg("-i")
                .arg(input)
                .arg("-ss")
                .arg(start.to_string())
                .arg("-to")
                .arg(end.to_string())
                .args(["-c:a", self.cfg.codec.as_str(), "-b:a", self.cfg.bitrate.as_str(), "-vn"])
                .arg(&output_file),
            SLICE_TIMEOUT,
            "slice",
        )
        .await?;

        if !output.status.success() {
            return Err(AudioError::CommandFailed(format!(
                "ffmpeg failed: {}",
                String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(200)
                    .collect::<String>()
            )));
        }

        if !output_file.exists() {
            return Err(AudioError::CommandFailed(
                "Output file not created".to_string(),
            ));
        }

        let duration = probe_duration(&output_file).await;
        Ok(SlicedSnippet {
            file: output_file,
            duration,
        })
    }
}

/// Delete a temporary audio file, best effort
pub fn cleanup_audio_file(file: &Path) {
    if file.exists() {
        if let Err(e) = std::fs::remove_file(file) {
            tracing::debug!(file = %file.display(), error = %e, "Cleanup failed");
        }
    }
}
