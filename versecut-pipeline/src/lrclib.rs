//! LRCLib API client
//!
//! Fetches synchronized lyrics for an artist/title pair. Tries an exact
//! lookup with the duration hint, exact lookups over the featuring-credit
//! title variants, then a fuzzy search ranked by duration proximity. Keeps
//! a polite fixed interval between requests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::titles::title_variations;

const LRCLIB_API_BASE: &str = "https://lrclib.net/api";
const USER_AGENT: &str = "versecut/0.1.0 (https://github.com/versecut/versecut)";
const REQUEST_INTERVAL: Duration = Duration::from_millis(500);

/// A track with synced lyrics as returned by LRCLib
#[derive(Debug, Clone)]
pub struct SyncedLyrics {
    pub id: i64,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub duration: f64,
    pub synced_lyrics: String,
}

/// Lyrics lookup seam used by the import runner
#[async_trait]
pub trait LyricsSource: Send + Sync {
    /// Best synced-lyrics match, or `None` when nothing usable exists
    async fn search(
        &self,
        artist: &str,
        title: &str,
        duration: Option<f64>,
    ) -> anyhow::Result<Option<SyncedLyrics>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibRecord {
    id: i64,
    track_name: String,
    artist_name: String,
    album_name: Option<String>,
    #[serde(default)]
    duration: f64,
    synced_lyrics: Option<String>,
}

impl LrclibRecord {
    fn into_synced(self) -> Option<SyncedLyrics> {
        let synced = self.synced_lyrics.filter(|s| !s.trim().is_empty())?;
        Some(SyncedLyrics {
            id: self.id,
            track_name: self.track_name,
            artist_name: self.artist_name,
            album_name: self.album_name,
            duration: self.duration,
            synced_lyrics: synced,
        })
    }
}

/// Interval limiter shared by all requests from this client
struct RequestPacer {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RequestPacer {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// LRCLib HTTP client
pub struct LrclibClient {
    http: reqwest::Client,
    pacer: RequestPacer,
    base_url: String,
}

impl LrclibClient {
    pub fn new() -> Self {
        Self::with_base_url(LRCLIB_API_BASE.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            pacer: RequestPacer::new(REQUEST_INTERVAL),
            base_url,
        }
    }

    /// Exact match via `/get`
    async fn get_exact(
        &self,
        artist: &str,
        title: &str,
        duration: Option<i64>,
    ) -> Option<SyncedLyrics> {
        self.pacer.wait().await;

        let mut params = vec![
            ("artist_name".to_string(), artist.to_string()),
            ("track_name".to_string(), title.to_string()),
        ];
        if let Some(d) = duration {
            params.push(("duration".to_string(), d.to_string()));
        }

        let response = self
            .http
            .get(format!("{}/get", self.base_url))
            .query(&params)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        response
            .json::<LrclibRecord>()
            .await
            .ok()
            .and_then(LrclibRecord::into_synced)
    }

    /// Fuzzy match via `/search`, ranked by duration proximity
    async fn search_fuzzy(
        &self,
        artist: &str,
        title: &str,
        expected_duration: Option<f64>,
    ) -> Option<SyncedLyrics> {
        self.pacer.wait().await;

        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", format!("{artist} {title}"))])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let records: Vec<LrclibRecord> = response.json().await.ok()?;
        let mut synced: Vec<SyncedLyrics> = records
            .into_iter()
            .filter_map(LrclibRecord::into_synced)
            .collect();
        if synced.is_empty() {
            return None;
        }

        if let Some(expected) = expected_duration {
            synced.sort_by(|a, b| {
                (a.duration - expected)
                    .abs()
                    .total_cmp(&(b.duration - expected).abs())
            });
        }
        synced.into_iter().next()
    }
}

impl Default for LrclibClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LyricsSource for LrclibClient {
    async fn search(
        &self,
        artist: &str,
        title: &str,
        duration: Option<f64>,
    ) -> anyhow::Result<Option<SyncedLyrics>> {
        let variants = title_variations(title);

        // Exact match with the duration hint first
        if let Some(d) = duration {
            for variant in &variants {
                if let Some(hit) = self.get_exact(artist, variant, Some(d as i64)).await {
                    return Ok(Some(hit));
                }
            }
        }

        // Exact match without duration
        for variant in &variants {
            if let Some(hit) = self.get_exact(artist, variant, None).await {
                return Ok(Some(hit));
            }
        }

        // Fuzzy search as a last resort
        Ok(self.search_fuzzy(artist, title, duration).await)
    }
}
