//! Database access
//!
//! Two SQLite databases: the curated track store and the processed-tracks
//! ledger. Each gets its own pool, created with `mode=rwc` and its schema
//! initialized up front.

pub mod curated;
pub mod ledger;

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use versecut_common::Result;

async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new().connect(&db_url).await?;
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Open the curated store and initialize its schema
pub async fn init_curated_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    curated::initialize_schema(&pool).await?;
    Ok(pool)
}

/// Open the ledger and initialize its schema
pub async fn init_ledger_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_pool(db_path).await?;
    ledger::initialize_schema(&pool).await?;
    Ok(pool)
}
