//! Processed-tracks ledger
//!
//! Durable per-(source, track) outcome record used for idempotent
//! resumption: a `success` track is never reprocessed by default, a
//! `failed` track is only retried with an explicit reprocess.

use std::collections::HashSet;

use sqlx::{Row, SqlitePool};
use versecut_common::Result;

/// Terminal outcome recorded for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Success,
    Failed,
    Skipped,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Success => "success",
            TrackStatus::Failed => "failed",
            TrackStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS processed_tracks (
        source TEXT NOT NULL,
        track_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        processed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (source, track_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_processed_source_status \
     ON processed_tracks(source, status)",
];

pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Ledger handle, cheap to clone
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a track outcome
    ///
    /// Upsert-on-conflict: a later outcome replaces an earlier one for the
    /// same (source, track) and refreshes the timestamp, so `success` after
    /// `failed` clears the failure.
    pub async fn mark_processed(
        &self,
        source: &str,
        track_id: i64,
        status: TrackStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_tracks (source, track_id, status, error_message, processed_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(source, track_id) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message,
                processed_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(source)
        .bind(track_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ids excluded from default reprocessing: success and failed outcomes
    pub async fn processed_ids(&self, source: &str) -> Result<HashSet<i64>> {
        let rows = sqlx::query(
            "SELECT track_id FROM processed_tracks \
             WHERE source = ? AND status IN ('success', 'failed')",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("track_id")).collect())
    }

    /// Status for one track, when recorded
    pub async fn status_of(&self, source: &str, track_id: i64) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT status FROM processed_tracks WHERE source = ? AND track_id = ?",
        )
        .bind(source)
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("status")))
    }

    /// Count of ledgered tracks, optionally for one source
    pub async fn processed_count(&self, source: Option<&str>) -> Result<i64> {
        let row = match source {
            Some(source) => {
                sqlx::query("SELECT COUNT(*) AS n FROM processed_tracks WHERE source = ?")
                    .bind(source)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM processed_tracks")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.get("n"))
    }

    /// Clear ledger entries, returning how many were removed
    pub async fn clear(&self, source: Option<&str>) -> Result<u64> {
        let result = match source {
            Some(source) => {
                sqlx::query("DELETE FROM processed_tracks WHERE source = ?")
                    .bind(source)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM processed_tracks").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One connection: each pooled sqlite::memory: connection is its own db
    async fn memory_ledger() -> Ledger {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize_schema(&pool).await.unwrap();
        Ledger::new(pool)
    }

    #[tokio::test]
    async fn success_replaces_failed_and_refreshes_timestamp() {
        let ledger = memory_ledger().await;
        ledger
            .mark_processed("curated", 7, TrackStatus::Failed, Some("download failed"))
            .await
            .unwrap();

        // Age the row so the refresh is observable
        sqlx::query(
            "UPDATE processed_tracks SET processed_at = '2000-01-01 00:00:00' \
             WHERE source = 'curated' AND track_id = 7",
        )
        .execute(&ledger.pool)
        .await
        .unwrap();

        ledger
            .mark_processed("curated", 7, TrackStatus::Success, None)
            .await
            .unwrap();

        let row = sqlx::query(
            "SELECT status, error_message, CAST(processed_at AS TEXT) AS at \
             FROM processed_tracks WHERE source = 'curated' AND track_id = 7",
        )
        .fetch_one(&ledger.pool)
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("status"), "success");
        assert_eq!(row.get::<Option<String>, _>("error_message"), None);
        assert_ne!(row.get::<String, _>("at"), "2000-01-01 00:00:00");
    }

    #[tokio::test]
    async fn processed_ids_cover_success_and_failed_but_not_skipped() {
        let ledger = memory_ledger().await;
        ledger.mark_processed("curated", 1, TrackStatus::Success, None).await.unwrap();
        ledger
            .mark_processed("curated", 2, TrackStatus::Failed, Some("boom"))
            .await
            .unwrap();
        ledger.mark_processed("curated", 3, TrackStatus::Skipped, None).await.unwrap();
        ledger.mark_processed("lrclib", 4, TrackStatus::Success, None).await.unwrap();

        let ids = ledger.processed_ids("curated").await.unwrap();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
        assert!(!ids.contains(&3));
        assert!(!ids.contains(&4));
    }

    #[tokio::test]
    async fn counts_and_clear_by_source() {
        let ledger = memory_ledger().await;
        ledger.mark_processed("curated", 1, TrackStatus::Success, None).await.unwrap();
        ledger.mark_processed("lrclib", 2, TrackStatus::Success, None).await.unwrap();

        assert_eq!(ledger.processed_count(None).await.unwrap(), 2);
        assert_eq!(ledger.processed_count(Some("curated")).await.unwrap(), 1);

        assert_eq!(ledger.clear(Some("curated")).await.unwrap(), 1);
        assert_eq!(ledger.processed_count(None).await.unwrap(), 1);
    }
}
