//! External playlist listing
//!
//! Resolves a playlist URL into ordered video metadata via yt-dlp's
//! flat-playlist mode. The import runner only sees the `PlaylistLister`
//! seam.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

const LIST_TIMEOUT: Duration = Duration::from_secs(120);
const TITLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata for one video in a playlist
#[derive(Debug, Clone)]
pub struct PlaylistVideo {
    pub video_id: String,
    pub title: String,
    pub uploader: String,
    pub duration: f64,
    pub url: String,
}

/// Playlist metadata seam used by the import runner
#[async_trait]
pub trait PlaylistLister: Send + Sync {
    /// The playlist's display name, when resolvable
    async fn playlist_title(&self, url: &str) -> anyhow::Result<Option<String>>;

    /// Ordered video metadata for the playlist
    async fn list_videos(&self, url: &str) -> anyhow::Result<Vec<PlaylistVideo>>;
}

/// yt-dlp backed lister
pub struct YtDlpLister;

#[async_trait]
impl PlaylistLister for YtDlpLister {
    async fn playlist_title(&self, url: &str) -> anyhow::Result<Option<String>> {
        let output = tokio::time::timeout(
            TITLE_TIMEOUT,
            Command::new("yt-dlp")
                .args([
                    "--flat-playlist",
                    "--print",
                    "%(playlist_title)s",
                    "--playlist-items",
                    "1",
                    url,
                ])
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("playlist title lookup timed out"))??;

        if !output.status.success() {
            return Ok(None);
        }
        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!title.is_empty()).then_some(title))
    }

    async fn list_videos(&self, url: &str) -> anyhow::Result<Vec<PlaylistVideo>> {
        let output = tokio::time::timeout(
            LIST_TIMEOUT,
            Command::new("yt-dlp")
                .args(["--flat-playlist", "--dump-json", url])
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("playlist listing timed out"))??;

        if !output.status.success() {
            anyhow::bail!(
                "yt-dlp failed: {}",
                String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(200)
                    .collect::<String>()
            );
        }

        let mut videos = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };

            let video_id = data["id"].as_str().unwrap_or_default().to_string();
            videos.push(PlaylistVideo {
                title: data["title"].as_str().unwrap_or_default().to_string(),
                uploader: data["uploader"]
                    .as_str()
                    .or_else(|| data["channel"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                duration: data["duration"].as_f64().unwrap_or(0.0),
                url: data["url"]
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}")),
                video_id,
            });
        }

        Ok(videos)
    }
}
