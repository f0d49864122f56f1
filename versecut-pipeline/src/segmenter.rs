//! LLM-based lyrics segmentation
//!
//! Sends line-numbered lyrics to a chat-completions provider and parses the
//! returned JSON into emotional segments plus a genre. Supports a batched
//! mode that analyzes many songs in one call.
//!
//! Rate limiting is a hard contract here: when a provider answers 429 the
//! segmenter returns immediately with the retry hint attached. It never
//! sleeps through a provider cool-down - the runner decides what to do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

use crate::config::{LlmConfig, LlmProvider};

/// Closed genre vocabulary; everything else normalizes to "other"
pub const VALID_GENRES: &[&str] = &[
    "afrobeats", "reggaeton", "dancehall", "hip-hop", "r&b", "pop", "rock",
    "country", "latin", "electronic", "folk", "jazz", "classical", "metal",
    "indie", "soul", "funk", "gospel", "blues", "reggae", "punk", "disco",
    "house", "techno", "trap", "drill", "afropop", "amapiano", "kizomba",
    "soca", "calypso", "bachata", "salsa", "cumbia", "merengue", "other",
];

const GENRE_ALIASES: &[(&str, &str)] = &[
    ("hiphop", "hip-hop"),
    ("hip hop", "hip-hop"),
    ("rnb", "r&b"),
    ("rhythm and blues", "r&b"),
    ("afro", "afrobeats"),
    ("afro-beats", "afrobeats"),
    ("dancehall/reggae", "dancehall"),
    ("edm", "electronic"),
    ("dance", "electronic"),
    ("alternative", "indie"),
    ("alt rock", "indie"),
    ("alt-rock", "indie"),
    ("alternative rock", "indie"),
    ("urban", "hip-hop"),
    ("tropical", "latin"),
    ("world", "other"),
];

/// Energy levels accepted as-is; anything else coerces to "medium"
pub const ENERGY_LEVELS: &[&str] = &["low", "medium", "high", "very-high"];

const SYSTEM_PROMPT: &str = "You are a music analysis expert. Output only valid JSON.";

/// Ceiling on batch-call completion tokens
const MAX_BATCH_TOKENS: u32 = 15_000;
/// Completion budget per song in a batch
const TOKENS_PER_SONG: u32 = 1_500;
/// Completion budget for a single-song call
const SINGLE_CALL_TOKENS: u32 = 2_000;

static GENRE_LIST: Lazy<String> = Lazy::new(|| VALID_GENRES.join(", "));

/// A meaningful segment of lyrics identified by the LLM
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// 1-indexed inclusive start line
    pub start_line: usize,
    /// 1-indexed inclusive end line
    pub end_line: usize,
    /// Lyrics text copied from those lines
    pub lyrics: String,
    /// Two-sentence free-text description, used for embedding
    pub ai_description: String,
    pub primary_emotion: String,
    pub secondary_emotion: Option<String>,
    /// One of [`ENERGY_LEVELS`] after validation
    pub energy: String,
    pub tone: String,
}

/// Successful single-song segmentation
#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub genre: String,
    pub segments: Vec<Segment>,
    /// Provider that produced the result
    pub provider: String,
}

/// One song's slot in a batched segmentation result
#[derive(Debug, Clone)]
pub struct BatchedSongResult {
    /// Track id for cache lookup
    pub track_id: i64,
    /// Position in the request, 1-indexed
    pub song_index: usize,
    pub title: String,
    pub artist: String,
    pub genre: Option<String>,
    pub segments: Vec<Segment>,
    /// Per-track failure; the rest of the batch is unaffected
    pub error: Option<String>,
}

/// Successful batched segmentation
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub songs: Vec<BatchedSongResult>,
    pub provider: String,
}

/// One song handed to `segment_batch`
#[derive(Debug, Clone)]
pub struct BatchSong {
    pub lyrics: String,
    pub title: String,
    pub artist: String,
    pub track_id: i64,
}

/// Segmentation failure
#[derive(Debug, Clone, Error)]
pub enum SegmentError {
    /// Provider signalled a rate limit; the caller stops the job and
    /// surfaces the wait to the operator
    #[error("Rate limited by {provider}, retry in {retry_after_seconds}s")]
    RateLimited {
        provider: String,
        retry_after_seconds: f64,
    },

    /// No provider produced usable output
    #[error("Segmentation failed: {0}")]
    Failed(String),
}

/// Transport-level provider failure
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key configured; skipped without consuming retries
    #[error("{0} API key not set")]
    NotConfigured(String),

    /// HTTP 429 with the structured retry hint already decoded
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: f64 },

    /// Provider returned success but no content
    #[error("empty response")]
    Empty,

    /// Transport or non-429 API error; retryable
    #[error("{0}")]
    Transport(String),
}

/// Chat-completions provider
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError>;
}

/// OpenAI-compatible chat provider (Groq, Together)
pub struct OpenAiChatProvider {
    provider: LlmProvider,
    http: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(provider: LlmProvider) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { provider, http }
    }

    fn retry_after_seconds(response: &reqwest::Response) -> f64 {
        let headers = response.headers();
        if let Some(ms) = headers
            .get("retry-after-ms")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
        {
            return ms / 1000.0;
        }
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(60.0)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatProvider {
    fn name(&self) -> &str {
        &self.provider.name
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let Some(api_key) = self.provider.api_key.as_deref() else {
            return Err(ProviderError::NotConfigured(self.provider.name.clone()));
        };

        let body = serde_json::json!({
            "model": self.provider.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.3,
            "max_tokens": max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.provider.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if response.status().as_u16() == 429 {
            let retry_after_seconds = Self::retry_after_seconds(&response);
            return Err(ProviderError::RateLimited {
                retry_after_seconds,
            });
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "{status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        match payload["choices"][0]["message"]["content"].as_str() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(ProviderError::Empty),
        }
    }
}

/// Lyrics segmentation seam used by the pipeline and the runner
#[async_trait]
pub trait LyricsSegmenter: Send + Sync {
    async fn segment_one(
        &self,
        lyrics: &str,
        title: &str,
        artist: &str,
    ) -> Result<SegmentationOutcome, SegmentError>;

    async fn segment_batch(&self, songs: &[BatchSong]) -> Result<BatchOutcome, SegmentError>;
}

/// Segmenter over an ordered provider list with linear-backoff retries
pub struct LlmSegmenter {
    providers: Vec<Arc<dyn ChatCompletion>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmSegmenter {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        let providers = cfg
            .providers
            .iter()
            .cloned()
            .map(|p| Arc::new(OpenAiChatProvider::new(p)) as Arc<dyn ChatCompletion>)
            .collect();
        Self {
            providers,
            max_retries: cfg.max_retries,
            retry_delay: cfg.retry_delay,
        }
    }

    /// Inject providers directly (tests)
    pub fn with_providers(
        providers: Vec<Arc<dyn ChatCompletion>>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            providers,
            max_retries,
            retry_delay,
        }
    }

    /// Shared provider/retry ladder
    ///
    /// `accept` parses the raw completion and returns `Ok` only for usable
    /// output; an `Err` counts as a retryable attempt. Rate limits abort
    /// immediately without sleeping; a missing key or empty completion
    /// moves on to the next provider without consuming retries.
    async fn run_ladder<T>(
        &self,
        prompt: &str,
        max_tokens: u32,
        mut accept: impl FnMut(&str, &str) -> Result<T, String>,
    ) -> Result<T, SegmentError> {
        let mut last_error: Option<String> = None;

        for provider in &self.providers {
            for attempt in 1..=self.max_retries {
                match provider.complete(prompt, max_tokens).await {
                    Ok(text) => match accept(provider.name(), &text) {
                        Ok(out) => return Ok(out),
                        Err(e) => {
                            tracing::debug!(
                                provider = provider.name(),
                                attempt,
                                error = %e,
                                "Unusable completion"
                            );
                            last_error = Some(e);
                        }
                    },
                    Err(ProviderError::RateLimited {
                        retry_after_seconds,
                    }) => {
                        tracing::warn!(
                            provider = provider.name(),
                            retry_after_seconds,
                            "Provider rate limited; surfacing without waiting"
                        );
                        return Err(SegmentError::RateLimited {
                            provider: provider.name().to_string(),
                            retry_after_seconds,
                        });
                    }
                    Err(e @ (ProviderError::NotConfigured(_) | ProviderError::Empty)) => {
                        last_error = Some(e.to_string());
                        break;
                    }
                    Err(ProviderError::Transport(e)) => {
                        tracing::debug!(
                            provider = provider.name(),
                            attempt,
                            error = %e,
                            "Provider call failed"
                        );
                        last_error = Some(e);
                    }
                }

                if attempt < self.max_retries {
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
            }
        }

        Err(SegmentError::Failed(
            last_error.unwrap_or_else(|| "All providers failed".to_string()),
        ))
    }
}

#[async_trait]
impl LyricsSegmenter for LlmSegmenter {
    async fn segment_one(
        &self,
        lyrics: &str,
        title: &str,
        artist: &str,
    ) -> Result<SegmentationOutcome, SegmentError> {
        let prompt = build_single_prompt(lyrics, title, artist);

        self.run_ladder(&prompt, SINGLE_CALL_TOKENS, |provider, text| {
            let (genre, segments) = parse_single_response(text)?;
            if segments.is_empty() {
                return Err("no segments in response".to_string());
            }
            Ok(SegmentationOutcome {
                genre,
                segments,
                provider: provider.to_string(),
            })
        })
        .await
    }

    async fn segment_batch(&self, songs: &[BatchSong]) -> Result<BatchOutcome, SegmentError> {
        if songs.is_empty() {
            return Ok(BatchOutcome {
                songs: Vec::new(),
                provider: String::new(),
            });
        }

        let prompt = build_batch_prompt(songs);
        let max_tokens = MAX_BATCH_TOKENS.min(songs.len() as u32 * TOKENS_PER_SONG);
        let expected: Vec<(String, String, i64)> = songs
            .iter()
            .map(|s| (s.title.clone(), s.artist.clone(), s.track_id))
            .collect();

        self.run_ladder(&prompt, max_tokens, move |provider, text| {
            let results = parse_batch_response(text, &expected)?;
            if results.iter().all(|r| r.segments.is_empty()) {
                return Err("no song in batch yielded segments".to_string());
            }
            Ok(BatchOutcome {
                songs: results,
                provider: provider.to_string(),
            })
        })
        .await
    }
}

/// Number non-empty lyric lines for the prompt, starting at 1
fn numbered_lyrics(lyrics: &str) -> String {
    let mut numbered = Vec::new();
    let mut n = 0;
    for line in lyrics.trim().lines() {
        if line.trim().is_empty() {
            continue;
        }
        n += 1;
        numbered.push(format!("{n}. {line}"));
    }
    numbered.join("\n")
}

fn segment_shape() -> String {
    r#"        {
          "start_line": <line number where segment starts>,
          "end_line": <line number where segment ends>,
          "lyrics": "<exact lyrics from those lines>",
          "ai_description": "<2 sentences on the emotional content - start with the emotion or theme, never with 'This segment' or 'This part'>",
          "primary_emotion": "<main emotion>",
          "secondary_emotion": "<supporting emotion or null>",
          "energy": "<low|medium|high|very-high>",
          "tone": "<how the emotion is expressed>"
        }"#
    .to_string()
}

fn build_single_prompt(lyrics: &str, title: &str, artist: &str) -> String {
    format!(
        r#"You are analyzing song lyrics to identify emotionally meaningful segments that could be sent in a conversation as a response.

First, determine the song's genre based on the artist name and lyrical style.

For each segment you identify:
1. It should be 10-20 seconds when sung (roughly 2-6 lines)
2. It should convey a clear emotional message
3. It should work as a standalone snippet in a chat
4. The lyrics should make sense without the rest of the song

Song: {title} by {artist}

Lyrics (with line numbers):
{numbered}

Identify 2-5 of the most emotionally resonant segments. Output ONLY valid JSON in this exact format:

{{
  "genre": "<primary genre: {genres}>",
  "segments": [
{shape}
  ]
}}

Important:
- The genre field is REQUIRED at the top level
- Line numbers must match the numbered lyrics above
- ai_description must start directly with the emotion or theme, e.g. "Longing for connection, aching to be understood" - never "This segment conveys..."
- Output ONLY the JSON, no other text"#,
        title = title,
        artist = artist,
        numbered = numbered_lyrics(lyrics),
        genres = &*GENRE_LIST,
        shape = segment_shape(),
    )
}

fn build_batch_prompt(songs: &[BatchSong]) -> String {
    let mut sections = Vec::new();
    for (i, song) in songs.iter().enumerate() {
        sections.push(format!(
            "--- SONG {n}: \"{title}\" by {artist} ---\nLyrics (with line numbers):\n{numbered}\n",
            n = i + 1,
            title = song.title,
            artist = song.artist,
            numbered = numbered_lyrics(&song.lyrics),
        ));
    }

    format!(
        r#"You are analyzing MULTIPLE songs' lyrics to identify emotionally meaningful segments.

For EACH song:
1. Determine the genre based on artist name and lyrical style
2. Identify 2-5 emotionally resonant segments (10-20 seconds when sung, ~2-6 lines)
3. Each segment should work as a standalone snippet in chat

{sections}

Output ONLY valid JSON with this exact structure:

{{
  "songs": [
    {{
      "song_index": <number matching SONG N>,
      "title": "<song title>",
      "artist": "<artist name>",
      "genre": "<primary genre: {genres}>",
      "segments": [
{shape}
      ]
    }}
  ]
}}

Important:
- song_index MUST match the SONG number (1, 2, 3...)
- Include title and artist in each song object for verification
- If a song cannot be segmented, include it with an empty segments array and add "error": "<reason>"
- Line numbers must match the numbered lyrics for THAT specific song (each song starts at line 1)
- ai_description must start with the emotion or theme, never "This segment"
- Output ONLY the JSON, no other text"#,
        sections = sections.join("\n"),
        genres = &*GENRE_LIST,
        shape = segment_shape(),
    )
}

/// Normalize a genre string into the closed vocabulary
///
/// Exact match, then the alias table, then substring containment in either
/// direction, then "other". Idempotent.
pub fn normalize_genre(genre: Option<&str>) -> String {
    let Some(raw) = genre else {
        return "other".to_string();
    };
    let lower = raw.to_lowercase().trim().to_string();
    if lower.is_empty() {
        return "other".to_string();
    }

    if VALID_GENRES.contains(&lower.as_str()) {
        return lower;
    }

    if let Some((_, target)) = GENRE_ALIASES.iter().find(|(alias, _)| *alias == lower) {
        return target.to_string();
    }

    for valid in VALID_GENRES {
        if lower.contains(valid) || valid.contains(lower.as_str()) {
            return valid.to_string();
        }
    }

    "other".to_string()
}

/// Strip markdown fences and surrounding prose, keeping the outermost JSON object
fn extract_json(text: &str) -> &str {
    let mut text = text.trim();

    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        text = match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
    } else if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        text = match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end >= start {
            return &text[start..=end];
        }
    }
    text
}

fn parse_segment_entry(seg: &Value) -> Result<Segment, String> {
    let field_usize = |key: &str| -> Result<usize, String> {
        seg[key]
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| format!("missing or non-integer {key}"))
    };
    let field_str = |key: &str| -> Result<String, String> {
        seg[key]
            .as_str()
            .map(|v| v.to_string())
            .ok_or_else(|| format!("missing {key}"))
    };

    Ok(Segment {
        start_line: field_usize("start_line")?,
        end_line: field_usize("end_line")?,
        lyrics: field_str("lyrics")?,
        ai_description: field_str("ai_description")?,
        primary_emotion: field_str("primary_emotion")?,
        secondary_emotion: seg["secondary_emotion"].as_str().map(|v| v.to_string()),
        energy: field_str("energy").unwrap_or_else(|_| "medium".to_string()),
        tone: field_str("tone").unwrap_or_default(),
    })
}

/// Parse a single-song response into (genre, segments)
fn parse_single_response(text: &str) -> Result<(String, Vec<Segment>), String> {
    let data: Value =
        serde_json::from_str(extract_json(text)).map_err(|e| format!("JSON parse error: {e}"))?;

    let genre = normalize_genre(data["genre"].as_str());

    let mut segments = Vec::new();
    if let Some(entries) = data["segments"].as_array() {
        for entry in entries {
            segments.push(parse_segment_entry(entry)?);
        }
    }

    Ok((genre, segments))
}

/// Parse a batched response, matching songs back to the request by index
///
/// Every requested song gets a result slot: missing slots are recorded as
/// "Not returned in batch response" and malformed entries get a per-song
/// parse error without discarding the batch.
fn parse_batch_response(
    text: &str,
    expected: &[(String, String, i64)],
) -> Result<Vec<BatchedSongResult>, String> {
    let data: Value =
        serde_json::from_str(extract_json(text)).map_err(|e| format!("JSON parse error: {e}"))?;

    let songs = data["songs"].as_array().cloned().unwrap_or_default();
    let by_index: std::collections::HashMap<usize, &Value> = songs
        .iter()
        .filter_map(|s| s["song_index"].as_u64().map(|i| (i as usize, s)))
        .collect();

    let mut results = Vec::with_capacity(expected.len());

    for (i, (title, artist, track_id)) in expected.iter().enumerate() {
        let song_index = i + 1;
        let base = BatchedSongResult {
            track_id: *track_id,
            song_index,
            title: title.clone(),
            artist: artist.clone(),
            genre: None,
            segments: Vec::new(),
            error: None,
        };

        let Some(song) = by_index.get(&song_index) else {
            results.push(BatchedSongResult {
                error: Some("Not returned in batch response".to_string()),
                ..base
            });
            continue;
        };

        let genre = Some(normalize_genre(song["genre"].as_str()));

        if let Some(err) = song["error"].as_str() {
            results.push(BatchedSongResult {
                genre,
                error: Some(err.to_string()),
                ..base
            });
            continue;
        }

        let entries = song["segments"].as_array().cloned().unwrap_or_default();
        let mut segments = Vec::new();
        let mut parse_error = None;
        for entry in &entries {
            match parse_segment_entry(entry) {
                Ok(seg) => segments.push(seg),
                Err(e) => {
                    parse_error = Some(format!("Segment parse error: {e}"));
                    break;
                }
            }
        }

        if let Some(e) = parse_error {
            results.push(BatchedSongResult {
                genre: None,
                error: Some(e),
                ..base
            });
        } else {
            results.push(BatchedSongResult {
                genre,
                segments,
                ..base
            });
        }
    }

    Ok(results)
}

/// Filter segments down to the ones safe to process
///
/// Keeps segments with `1 <= start_line <= end_line <= total_lines`, a
/// non-empty description and primary emotion; energy outside the closed
/// set is coerced to "medium". Every rejection produces a diagnostic.
pub fn validate_segments(
    segments: Vec<Segment>,
    total_lines: usize,
) -> (Vec<Segment>, Vec<String>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (i, mut seg) in segments.into_iter().enumerate() {
        if seg.start_line < 1 {
            errors.push(format!("Segment {i}: start_line < 1"));
            continue;
        }
        if seg.end_line < seg.start_line {
            errors.push(format!("Segment {i}: end_line < start_line"));
            continue;
        }
        if seg.end_line > total_lines {
            errors.push(format!("Segment {i}: end_line > total_lines ({total_lines})"));
            continue;
        }
        if seg.ai_description.trim().is_empty() {
            errors.push(format!("Segment {i}: missing ai_description"));
            continue;
        }
        if seg.primary_emotion.trim().is_empty() {
            errors.push(format!("Segment {i}: missing primary_emotion"));
            continue;
        }

        if !ENERGY_LEVELS.contains(&seg.energy.as_str()) {
            seg.energy = "medium".to_string();
        }

        valid.push(seg);
    }

    (valid, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: usize, end: usize) -> Segment {
        Segment {
            start_line: start,
            end_line: end,
            lyrics: "la la".to_string(),
            ai_description: "Joyful and free, dancing into the night".to_string(),
            primary_emotion: "joy".to_string(),
            secondary_emotion: None,
            energy: "high".to_string(),
            tone: "celebratory".to_string(),
        }
    }

    #[test]
    fn genre_normalization_exact_alias_substring_other() {
        assert_eq!(normalize_genre(Some("afrobeats")), "afrobeats");
        assert_eq!(normalize_genre(Some("HipHop")), "hip-hop");
        assert_eq!(normalize_genre(Some("EDM")), "electronic");
        assert_eq!(normalize_genre(Some("alternative")), "indie");
        assert_eq!(normalize_genre(Some("afro")), "afrobeats");
        assert_eq!(normalize_genre(Some("melodic techno")), "techno");
        assert_eq!(normalize_genre(Some("polka")), "other");
        assert_eq!(normalize_genre(None), "other");
    }

    #[test]
    fn genre_normalization_is_idempotent_and_closed() {
        for raw in ["Afro", "dance", "alt rock", "trap soul", "xyzzy", "r&b"] {
            let once = normalize_genre(Some(raw));
            assert!(VALID_GENRES.contains(&once.as_str()), "{once} not in vocabulary");
            assert_eq!(normalize_genre(Some(&once)), once);
        }
    }

    #[test]
    fn extracts_json_from_fences_and_prose() {
        let fenced = "Sure! Here you go:\n```json\n{\"genre\": \"pop\", \"segments\": []}\n```\nHope that helps.";
        let (genre, segments) = parse_single_response(fenced).unwrap();
        assert_eq!(genre, "pop");
        assert!(segments.is_empty());

        let prose = "The analysis follows. {\"genre\": \"rock\", \"segments\": []} Done.";
        let (genre, _) = parse_single_response(prose).unwrap();
        assert_eq!(genre, "rock");
    }

    #[test]
    fn parses_single_response_segments() {
        let text = r#"{
          "genre": "afrobeats",
          "segments": [{
            "start_line": 2, "end_line": 4,
            "lyrics": "I go give you anything",
            "ai_description": "Devotion without limits, promising everything",
            "primary_emotion": "devotion",
            "secondary_emotion": null,
            "energy": "medium",
            "tone": "tender"
          }]
        }"#;
        let (genre, segments) = parse_single_response(text).unwrap();
        assert_eq!(genre, "afrobeats");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_line, 2);
        assert_eq!(segments[0].secondary_emotion, None);
    }

    #[test]
    fn batch_missing_song_gets_error_others_unaffected() {
        let expected = vec![
            ("One".to_string(), "A".to_string(), 11),
            ("Two".to_string(), "B".to_string(), 22),
        ];
        let text = r#"{
          "songs": [{
            "song_index": 1, "title": "One", "artist": "A", "genre": "pop",
            "segments": [{
              "start_line": 1, "end_line": 2, "lyrics": "x",
              "ai_description": "Hope rising over a steady beat",
              "primary_emotion": "hope", "secondary_emotion": null,
              "energy": "high", "tone": "uplifting"
            }]
          }]
        }"#;
        let results = parse_batch_response(text, &expected).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].track_id, 11);
        assert_eq!(results[0].segments.len(), 1);
        assert!(results[0].error.is_none());
        assert_eq!(
            results[1].error.as_deref(),
            Some("Not returned in batch response")
        );
        assert!(results[1].segments.is_empty());
    }

    #[test]
    fn batch_malformed_entry_yields_per_song_error() {
        let expected = vec![("One".to_string(), "A".to_string(), 11)];
        let text = r#"{
          "songs": [{
            "song_index": 1, "title": "One", "artist": "A", "genre": "pop",
            "segments": [{ "start_line": "not a number" }]
          }]
        }"#;
        let results = parse_batch_response(text, &expected).unwrap();
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Segment parse error"));
    }

    #[test]
    fn batch_explicit_song_error_is_kept() {
        let expected = vec![("One".to_string(), "A".to_string(), 11)];
        let text = r#"{
          "songs": [{
            "song_index": 1, "title": "One", "artist": "A",
            "genre": "pop", "segments": [], "error": "instrumental"
          }]
        }"#;
        let results = parse_batch_response(text, &expected).unwrap();
        assert_eq!(results[0].error.as_deref(), Some("instrumental"));
        assert_eq!(results[0].genre.as_deref(), Some("pop"));
    }

    #[test]
    fn validation_enforces_bounds_and_coerces_energy() {
        let mut odd = segment(2, 3);
        odd.energy = "extreme".to_string();

        let segments = vec![
            segment(1, 2),
            segment(0, 2),
            segment(3, 2),
            segment(2, 99),
            odd,
            Segment {
                ai_description: "  ".to_string(),
                ..segment(1, 1)
            },
        ];
        let (valid, errors) = validate_segments(segments, 10);

        assert_eq!(valid.len(), 2);
        assert_eq!(errors.len(), 4);
        assert_eq!(valid[1].energy, "medium");
        assert!(ENERGY_LEVELS.contains(&valid[0].energy.as_str()));
    }

    #[test]
    fn numbered_lyrics_skip_empty_lines() {
        let numbered = numbered_lyrics("one\n\ntwo\n   \nthree");
        assert_eq!(numbered, "1. one\n2. two\n3. three");
    }

    #[test]
    fn batch_prompt_numbers_each_song_from_one() {
        let songs = vec![
            BatchSong {
                lyrics: "a\nb".to_string(),
                title: "First".to_string(),
                artist: "X".to_string(),
                track_id: 1,
            },
            BatchSong {
                lyrics: "c\nd".to_string(),
                title: "Second".to_string(),
                artist: "Y".to_string(),
                track_id: 2,
            },
        ];
        let prompt = build_batch_prompt(&songs);
        assert!(prompt.contains("--- SONG 1: \"First\" by X ---"));
        assert!(prompt.contains("--- SONG 2: \"Second\" by Y ---"));
        // Both songs restart numbering at line 1
        assert_eq!(prompt.matches("1. ").count(), 2);
    }

    mod ladder {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct ScriptedProvider {
            name: &'static str,
            calls: AtomicUsize,
            script: Vec<Result<String, ProviderErrorKind>>,
        }

        #[derive(Clone)]
        enum ProviderErrorKind {
            RateLimited(f64),
            NotConfigured,
            Transport,
        }

        impl ScriptedProvider {
            fn new(name: &'static str, script: Vec<Result<String, ProviderErrorKind>>) -> Self {
                Self {
                    name,
                    calls: AtomicUsize::new(0),
                    script,
                }
            }
        }

        #[async_trait]
        impl ChatCompletion for ScriptedProvider {
            fn name(&self) -> &str {
                self.name
            }

            async fn complete(&self, _: &str, _: u32) -> Result<String, ProviderError> {
                let i = self.calls.fetch_add(1, Ordering::SeqCst);
                let step = self.script.get(i).cloned().unwrap_or_else(|| {
                    self.script.last().cloned().unwrap_or(Err(ProviderErrorKind::Transport))
                });
                match step {
                    Ok(text) => Ok(text),
                    Err(ProviderErrorKind::RateLimited(secs)) => Err(ProviderError::RateLimited {
                        retry_after_seconds: secs,
                    }),
                    Err(ProviderErrorKind::NotConfigured) => {
                        Err(ProviderError::NotConfigured(self.name.to_string()))
                    }
                    Err(ProviderErrorKind::Transport) => {
                        Err(ProviderError::Transport("boom".to_string()))
                    }
                }
            }
        }

        const GOOD: &str = r#"{"genre":"pop","segments":[{
            "start_line":1,"end_line":2,"lyrics":"x",
            "ai_description":"Hope rising, carried by the chorus",
            "primary_emotion":"hope","secondary_emotion":null,
            "energy":"high","tone":"uplifting"}]}"#;

        #[tokio::test]
        async fn rate_limit_returns_immediately_with_hint() {
            let provider = Arc::new(ScriptedProvider::new(
                "groq",
                vec![Err(ProviderErrorKind::RateLimited(90.0))],
            ));
            let segmenter = LlmSegmenter::with_providers(
                vec![provider.clone() as Arc<dyn ChatCompletion>],
                3,
                Duration::from_millis(1),
            );

            let started = std::time::Instant::now();
            let err = segmenter.segment_one("la", "T", "A").await.unwrap_err();
            match err {
                SegmentError::RateLimited {
                    provider,
                    retry_after_seconds,
                } => {
                    assert_eq!(provider, "groq");
                    assert!((retry_after_seconds - 90.0).abs() < 1e-9);
                }
                other => panic!("expected rate limit, got {other:?}"),
            }
            // No sleeping through the cool-down, and no second attempt
            assert!(started.elapsed() < Duration::from_secs(1));
            assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn transport_errors_retry_then_fall_through_to_next_provider() {
            let flaky = Arc::new(ScriptedProvider::new(
                "groq",
                vec![Err(ProviderErrorKind::Transport)],
            ));
            let good = Arc::new(ScriptedProvider::new("together", vec![Ok(GOOD.to_string())]));
            let segmenter = LlmSegmenter::with_providers(
                vec![
                    flaky.clone() as Arc<dyn ChatCompletion>,
                    good.clone() as Arc<dyn ChatCompletion>,
                ],
                2,
                Duration::from_millis(1),
            );

            let outcome = segmenter.segment_one("la", "T", "A").await.unwrap();
            assert_eq!(outcome.provider, "together");
            assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
            assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn unconfigured_provider_skipped_without_retries() {
            let missing = Arc::new(ScriptedProvider::new(
                "groq",
                vec![Err(ProviderErrorKind::NotConfigured)],
            ));
            let good = Arc::new(ScriptedProvider::new("together", vec![Ok(GOOD.to_string())]));
            let segmenter = LlmSegmenter::with_providers(
                vec![
                    missing.clone() as Arc<dyn ChatCompletion>,
                    good as Arc<dyn ChatCompletion>,
                ],
                3,
                Duration::from_millis(1),
            );

            segmenter.segment_one("la", "T", "A").await.unwrap();
            assert_eq!(missing.calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn empty_batch_succeeds_trivially() {
            let segmenter =
                LlmSegmenter::with_providers(Vec::new(), 3, Duration::from_millis(1));
            let outcome = segmenter.segment_batch(&[]).await.unwrap();
            assert!(outcome.songs.is_empty());
        }
    }
}
