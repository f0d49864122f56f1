//! Curated track store
//!
//! Playlists, tracks with synced lyrics, and skipped-track records. Every
//! track row carries a normalized `song_key` so the same song reached via
//! different videos deduplicates; the unique constraints distinguish
//! "same video again" from "same song via another video".

use std::collections::HashSet;

use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::playlist::PlaylistVideo;
use crate::titles::normalize_song_key;

/// Track insert failure
#[derive(Debug, Error)]
pub enum CuratedError {
    /// This exact video was already imported
    #[error("Video {0} already imported")]
    DuplicateVideo(String),

    /// The song already exists under a different video
    #[error("Song '{0}' already curated")]
    DuplicateSong(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// A curated track as consumed by the pipeline
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Track {
    pub id: i64,
    pub artist_name: String,
    pub name: String,
    pub album_name: Option<String>,
    pub duration: f64,
    pub synced_lyrics: String,
    pub genre: String,
}

/// Track summary row for the HTTP listing
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrackSummary {
    pub id: i64,
    pub artist_name: String,
    pub name: String,
    pub album_name: Option<String>,
    pub duration: f64,
    pub genre: String,
    pub youtube_video_id: String,
}

/// Playlist row with its track count
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlaylistRow {
    pub id: i64,
    pub youtube_url: String,
    pub genre: String,
    pub name: Option<String>,
    pub imported_at: Option<String>,
    pub track_count: i64,
}

/// Skipped-track row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SkippedRow {
    pub id: i64,
    pub playlist_id: i64,
    pub youtube_video_id: String,
    pub youtube_title: String,
    pub parsed_artist: Option<String>,
    pub parsed_title: Option<String>,
    pub reason: String,
    pub imported_at: Option<String>,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY,
        youtube_url TEXT UNIQUE NOT NULL,
        genre TEXT NOT NULL,
        name TEXT,
        imported_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracks (
        id INTEGER PRIMARY KEY,
        playlist_id INTEGER REFERENCES playlists(id),
        youtube_video_id TEXT UNIQUE NOT NULL,
        youtube_title TEXT NOT NULL,
        artist_name TEXT NOT NULL,
        name TEXT NOT NULL,
        album_name TEXT,
        duration FLOAT NOT NULL,
        synced_lyrics TEXT NOT NULL,
        genre TEXT NOT NULL,
        lrclib_id INTEGER,
        song_key TEXT,
        imported_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skipped_tracks (
        id INTEGER PRIMARY KEY,
        playlist_id INTEGER REFERENCES playlists(id),
        youtube_video_id TEXT NOT NULL,
        youtube_title TEXT NOT NULL,
        parsed_artist TEXT,
        parsed_title TEXT,
        reason TEXT NOT NULL,
        imported_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tracks_genre ON tracks(genre)",
    "CREATE INDEX IF NOT EXISTS idx_tracks_playlist ON tracks(playlist_id)",
];

/// Create tables and run the song_key migration
///
/// Older databases predate the `song_key` column. The migration adds the
/// column nullable, backfills it by normalization, and only then creates
/// the unique index; if backfilled duplicates collide, the index is left
/// uncreated and a diagnostic is logged for manual dedup.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    let columns = sqlx::query("PRAGMA table_info(tracks)")
        .fetch_all(pool)
        .await?;
    let has_song_key = columns
        .iter()
        .any(|row| row.get::<String, _>("name") == "song_key");
    if !has_song_key {
        sqlx::query("ALTER TABLE tracks ADD COLUMN song_key TEXT")
            .execute(pool)
            .await?;
    }

    let missing = sqlx::query("SELECT id, artist_name, name FROM tracks WHERE song_key IS NULL")
        .fetch_all(pool)
        .await?;
    for row in &missing {
        let id: i64 = row.get("id");
        let artist: String = row.get("artist_name");
        let name: String = row.get("name");
        sqlx::query("UPDATE tracks SET song_key = ? WHERE id = ?")
            .bind(normalize_song_key(&artist, &name))
            .bind(id)
            .execute(pool)
            .await?;
    }

    match sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_tracks_song_key ON tracks(song_key)")
        .execute(pool)
        .await
    {
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Duplicate songs detected; song_key index left uncreated, dedup required"
            );
        }
    }

    Ok(())
}

/// Insert (or find) a playlist row, returning its id
pub async fn upsert_playlist(
    pool: &SqlitePool,
    youtube_url: &str,
    genre: &str,
    name: Option<&str>,
) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO playlists (youtube_url, genre, name) VALUES (?, ?, ?)")
        .bind(youtube_url)
        .bind(genre)
        .bind(name)
        .execute(pool)
        .await?;

    let row = sqlx::query("SELECT id FROM playlists WHERE youtube_url = ?")
        .bind(youtube_url)
        .fetch_one(pool)
        .await?;
    Ok(row.get("id"))
}

/// Insert a curated track
///
/// The two unique constraints produce distinct failures: same video id
/// again is [`CuratedError::DuplicateVideo`], same normalized song via a
/// different video is [`CuratedError::DuplicateSong`].
#[allow(clippy::too_many_arguments)]
pub async fn insert_track(
    pool: &SqlitePool,
    playlist_id: i64,
    video: &PlaylistVideo,
    artist_name: &str,
    name: &str,
    album_name: Option<&str>,
    duration: f64,
    synced_lyrics: &str,
    genre: &str,
    lrclib_id: i64,
) -> Result<(), CuratedError> {
    let song_key = normalize_song_key(artist_name, name);

    let result = sqlx::query(
        r#"
        INSERT INTO tracks (
            playlist_id, youtube_video_id, youtube_title,
            artist_name, name, album_name, duration,
            synced_lyrics, genre, lrclib_id, song_key
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(playlist_id)
    .bind(&video.video_id)
    .bind(&video.title)
    .bind(artist_name)
    .bind(name)
    .bind(album_name)
    .bind(duration)
    .bind(synced_lyrics)
    .bind(genre)
    .bind(lrclib_id)
    .bind(&song_key)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) => {
            let message = db_err.message().to_lowercase();
            if message.contains("youtube_video_id") {
                Err(CuratedError::DuplicateVideo(video.video_id.clone()))
            } else if message.contains("song_key") {
                Err(CuratedError::DuplicateSong(format!("{artist_name} - {name}")))
            } else {
                Err(CuratedError::Db(sqlx::Error::Database(db_err)))
            }
        }
        Err(e) => Err(CuratedError::Db(e)),
    }
}

/// Persist a skipped video for review
pub async fn insert_skipped(
    pool: &SqlitePool,
    playlist_id: i64,
    video: &PlaylistVideo,
    parsed_artist: &str,
    parsed_title: &str,
    reason: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO skipped_tracks (
            playlist_id, youtube_video_id, youtube_title,
            parsed_artist, parsed_title, reason
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(playlist_id)
    .bind(&video.video_id)
    .bind(&video.title)
    .bind(parsed_artist)
    .bind(parsed_title)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count curated tracks, optionally per genre
pub async fn track_count(pool: &SqlitePool, genre: Option<&str>) -> Result<i64, sqlx::Error> {
    let row = match genre {
        Some(genre) => sqlx::query("SELECT COUNT(*) AS n FROM tracks WHERE genre = ?")
            .bind(genre)
            .fetch_one(pool)
            .await?,
        None => sqlx::query("SELECT COUNT(*) AS n FROM tracks").fetch_one(pool).await?,
    };
    Ok(row.get("n"))
}

/// Track counts grouped by genre, most populous first
pub async fn genre_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT genre, COUNT(*) AS n FROM tracks GROUP BY genre ORDER BY n DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("genre"), row.get("n")))
        .collect())
}

/// Candidate tracks for a pipeline run, in id order
///
/// `exclude` carries already-ledgered track ids; the limit applies after
/// exclusion so a rerun picks up where the ledger left off.
pub async fn candidate_tracks(
    pool: &SqlitePool,
    genre: Option<&str>,
    limit: Option<usize>,
    exclude: &HashSet<i64>,
) -> Result<Vec<Track>, sqlx::Error> {
    let base = "SELECT id, artist_name, name, album_name, duration, synced_lyrics, genre \
                FROM tracks";
    let tracks: Vec<Track> = match genre {
        Some(genre) => {
            sqlx::query_as(&format!("{base} WHERE genre = ? ORDER BY id"))
                .bind(genre)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as(&format!("{base} ORDER BY id"))
                .fetch_all(pool)
                .await?
        }
    };

    let mut filtered: Vec<Track> = tracks
        .into_iter()
        .filter(|t| !exclude.contains(&t.id))
        .collect();
    if let Some(limit) = limit {
        filtered.truncate(limit);
    }
    Ok(filtered)
}

/// Track summaries for the HTTP listing, in id order
pub async fn list_tracks(
    pool: &SqlitePool,
    genre: Option<&str>,
) -> Result<Vec<TrackSummary>, sqlx::Error> {
    let base = "SELECT id, artist_name, name, album_name, duration, genre, youtube_video_id \
                FROM tracks";
    match genre {
        Some(genre) => {
            sqlx::query_as(&format!("{base} WHERE genre = ? ORDER BY id"))
                .bind(genre)
                .fetch_all(pool)
                .await
        }
        None => sqlx::query_as(&format!("{base} ORDER BY id")).fetch_all(pool).await,
    }
}

/// All playlists with their track counts, newest first
pub async fn list_playlists(pool: &SqlitePool) -> Result<Vec<PlaylistRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            p.id, p.youtube_url, p.genre, p.name,
            CAST(p.imported_at AS TEXT) AS imported_at,
            COUNT(t.id) AS track_count
        FROM playlists p
        LEFT JOIN tracks t ON t.playlist_id = p.id
        GROUP BY p.id
        ORDER BY p.imported_at DESC
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Skipped tracks, optionally for one playlist
pub async fn list_skipped(
    pool: &SqlitePool,
    playlist_id: Option<i64>,
) -> Result<Vec<SkippedRow>, sqlx::Error> {
    let base = "SELECT id, playlist_id, youtube_video_id, youtube_title, \
                parsed_artist, parsed_title, reason, \
                CAST(imported_at AS TEXT) AS imported_at \
                FROM skipped_tracks";
    match playlist_id {
        Some(id) => {
            sqlx::query_as(&format!("{base} WHERE playlist_id = ?"))
                .bind(id)
                .fetch_all(pool)
                .await
        }
        None => sqlx::query_as(base).fetch_all(pool).await,
    }
}

/// Count of skipped tracks
pub async fn skipped_count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM skipped_tracks")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}
