//! versecut-pipeline - Emotional song-snippet processing pipeline
//!
//! Ingests tracks with time-synchronized lyrics, acquires matching audio,
//! carves emotionally meaningful snippets, and publishes each snippet as a
//! vector in a semantic index. Driven by a batch CLI and an HTTP control
//! plane that streams progress over SSE.

pub mod api;
pub mod audio;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod index;
pub mod lrc;
pub mod lrclib;
pub mod pipeline;
pub mod playlist;
pub mod runner;
pub mod segmenter;
pub mod skiplog;
pub mod storage;
pub mod titles;

use std::sync::Arc;

use sqlx::SqlitePool;
use versecut_common::events::EventBus;

use crate::config::Config;
use crate::db::ledger::Ledger;
use crate::embedder::TextEmbedder;
use crate::index::SnippetIndex;
use crate::runner::import::ImportRunner;
use crate::runner::pipeline::PipelineRunner;

/// Application state shared across HTTP handlers and CLI commands
#[derive(Clone)]
pub struct AppState {
    /// Startup configuration, parsed once from the environment
    pub config: Arc<Config>,
    /// Curated track store
    pub curated: SqlitePool,
    /// Processed-tracks ledger
    pub ledger: Ledger,
    /// Event bus backing the SSE feed
    pub event_bus: EventBus,
    /// Pipeline job runner (process-wide singleton)
    pub pipeline: Arc<PipelineRunner>,
    /// Playlist import runner (process-wide singleton)
    pub import: Arc<ImportRunner>,
    /// Description embedder, shared with the search and embed endpoints
    pub embedder: Arc<dyn TextEmbedder>,
    /// Vector index gateway
    pub index: Arc<dyn SnippetIndex>,
}
