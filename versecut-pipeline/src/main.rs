//! versecut - emotional song-snippet pipeline
//!
//! One binary, two surfaces: `serve` runs the HTTP control plane, the
//! other subcommands drive the same runners and stores from the terminal.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use versecut_common::events::{Event, EventBus};

use versecut_pipeline::api::build_router;
use versecut_pipeline::audio::YtDlpAcquirer;
use versecut_pipeline::config::Config;
use versecut_pipeline::db::{self, curated, ledger::Ledger};
use versecut_pipeline::embedder::{FastEmbedder, TextEmbedder};
use versecut_pipeline::index::{QdrantIndex, SearchFilters, SnippetIndex};
use versecut_pipeline::lrclib::LrclibClient;
use versecut_pipeline::pipeline::TrackPipeline;
use versecut_pipeline::playlist::YtDlpLister;
use versecut_pipeline::runner::import::{ImportRequest, ImportRunner};
use versecut_pipeline::runner::pipeline::{PipelineRequest, PipelineRunner};
use versecut_pipeline::segmenter::LlmSegmenter;
use versecut_pipeline::skiplog::SkipLog;
use versecut_pipeline::storage::BlobStore;
use versecut_pipeline::AppState;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "versecut", version, about = "Emotional song-snippet pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control plane
    Serve {
        /// Bind host (overrides HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Process curated tracks through the pipeline
    Run {
        #[arg(long, default_value = "curated")]
        source: String,
        /// Only tracks with this genre
        #[arg(long)]
        genre: Option<String>,
        /// Maximum tracks to process
        #[arg(long)]
        limit: Option<usize>,
        /// Segment and report without downloading or indexing
        #[arg(long)]
        dry_run: bool,
        /// Include tracks the ledger already covers
        #[arg(long)]
        reprocess: bool,
    },
    /// Import a playlist into the curated store
    ImportPlaylist {
        #[arg(long)]
        url: String,
        #[arg(long)]
        genre: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// List imported playlists
    Playlists,
    /// List tracks skipped during import
    Skipped {
        #[arg(long)]
        playlist_id: Option<i64>,
    },
    /// Show store, ledger, and index totals
    Stats,
    /// Query the snippet index
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        emotion: Option<String>,
        #[arg(long)]
        energy: Option<String>,
    },
    /// Delete and recreate the snippet collection
    ClearIndex {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

async fn build_state(config: Config) -> Result<AppState> {
    config.ensure_directories()?;
    let config = Arc::new(config);

    let curated_pool = db::init_curated_pool(&config.curated_db_path()).await?;
    let ledger_pool = db::init_ledger_pool(&config.ledger_db_path()).await?;
    let ledger = Ledger::new(ledger_pool);

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let segmenter = Arc::new(LlmSegmenter::from_config(&config.llm));
    let acquirer = Arc::new(YtDlpAcquirer::new(&config));
    let embedder: Arc<dyn TextEmbedder> = Arc::new(FastEmbedder::new(config.embedding.clone()));
    let index: Arc<dyn SnippetIndex> = Arc::new(QdrantIndex::new(
        &config.vector_index,
        embedder.dimension(),
    ));
    let storage = Arc::new(BlobStore::new(config.blob.clone()));
    let skiplog = SkipLog::new(config.logs_dir());

    let processor = Arc::new(TrackPipeline::new(
        acquirer,
        segmenter.clone(),
        embedder.clone(),
        index.clone(),
        storage,
        skiplog,
        config.audio.duration_tolerance,
    ));

    let pipeline = Arc::new(PipelineRunner::new(
        event_bus.clone(),
        curated_pool.clone(),
        ledger.clone(),
        segmenter,
        processor,
        config.llm.batch_size,
        config.llm.enable_batch,
        config.logs_dir(),
    ));

    let import = Arc::new(ImportRunner::new(
        event_bus.clone(),
        curated_pool.clone(),
        Arc::new(YtDlpLister),
        Arc::new(LrclibClient::new()),
    ));

    Ok(AppState {
        config,
        curated: curated_pool,
        ledger,
        event_bus,
        pipeline,
        import,
        embedder,
        index,
    })
}

fn print_event(event: &Event) {
    match event {
        Event::PipelineStarted { total_tracks, dry_run, .. } => {
            println!("Pipeline started: {total_tracks} tracks (dry run: {dry_run})");
        }
        Event::BatchSegmentationStarted { total_batches, .. } => {
            println!("Phase 1: batch segmentation, {total_batches} batches");
        }
        Event::BatchSegmentationProgress { batch, total_batches, segmented, failed, .. } => {
            println!("  batch {batch}/{total_batches}: {segmented} segmented, {failed} failed");
        }
        Event::BatchSegmentationComplete { cached_tracks, .. } => {
            println!("Phase 1 complete: {cached_tracks} tracks cached");
        }
        Event::TrackStart { index, total, artist, title, .. } => {
            println!("[{index}/{total}] {artist} - {title}");
        }
        Event::TrackComplete { segments_indexed, .. } => {
            println!("  done, {segments_indexed} segments indexed");
        }
        Event::TrackError { errors, .. } => {
            println!("  failed: {}", errors.join("; "));
        }
        Event::RateLimited { provider, retry_after_seconds, .. } => {
            let mins = (retry_after_seconds / 60.0).floor() as u64;
            let secs = (retry_after_seconds % 60.0).round() as u64;
            println!(
                "Rate limited by {}. Try again in {mins}m {secs}s",
                provider.as_deref().unwrap_or("provider")
            );
        }
        Event::PipelineStopped { .. } => println!("Pipeline stopped."),
        Event::PipelineComplete { processed, skipped, segments_indexed, .. } => {
            println!(
                "Pipeline complete: {processed} processed, {skipped} skipped, \
                 {segments_indexed} segments indexed"
            );
        }
        Event::PipelineError { error, .. } => println!("Pipeline error: {error}"),
        Event::ImportFetching { playlist_url, .. } => {
            println!("Fetching playlist: {playlist_url}");
        }
        Event::ImportStarted { playlist_name, total_videos, .. } => {
            println!("Importing \"{playlist_name}\": {total_videos} videos");
        }
        Event::ImportTrackProcessing { .. } => {}
        Event::ImportTrackImported { index, artist, title, .. } => {
            println!("  [{index}] imported: {artist} - {title}");
        }
        Event::ImportTrackSkipped { index, video_title, reason, .. } => {
            println!("  [{index}] skipped: {video_title} ({reason})");
        }
        Event::ImportStopped { .. } => println!("Import stopped."),
        Event::ImportComplete { imported, skipped, total_videos, .. } => {
            println!("Import complete: {imported} imported, {skipped} skipped of {total_videos}");
        }
        Event::ImportError { error, .. } => println!("Import error: {error}"),
    }
}

/// Follow bus events for one task until its terminal event
async fn follow_task(mut rx: tokio::sync::broadcast::Receiver<Event>, task_id: uuid::Uuid) {
    loop {
        match rx.recv().await {
            Ok(event) if event.task_id() == task_id => {
                print_event(&event);
                if event.is_terminal() {
                    break;
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn cmd_serve(state: AppState, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| state.config.http_host.clone());
    let port = port.unwrap_or(state.config.http_port);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    tracing::info!("Listening on http://{host}:{port}");
    tracing::info!("Health check: http://{host}:{port}/api/v1/health");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn cmd_run(state: AppState, request: PipelineRequest) -> Result<()> {
    let rx = state.event_bus.subscribe();
    let (task_id, total) = state
        .pipeline
        .start(request)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Task {task_id}: {total} tracks");
    follow_task(rx, task_id).await;

    // Free accelerator memory before the process lingers
    state.embedder.unload();
    Ok(())
}

async fn cmd_import(state: AppState, request: ImportRequest) -> Result<()> {
    let rx = state.event_bus.subscribe();
    let task_id = state
        .import
        .start(request)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    follow_task(rx, task_id).await;
    Ok(())
}

async fn cmd_playlists(state: &AppState) -> Result<()> {
    let playlists = curated::list_playlists(&state.curated).await?;
    if playlists.is_empty() {
        println!("No playlists imported yet");
        return Ok(());
    }
    println!("Imported playlists ({}):", playlists.len());
    for p in playlists {
        println!(
            "  {} [{}] {} tracks - {}",
            p.name.as_deref().unwrap_or("Unnamed"),
            p.genre,
            p.track_count,
            p.youtube_url,
        );
    }
    Ok(())
}

async fn cmd_skipped(state: &AppState, playlist_id: Option<i64>) -> Result<()> {
    let skipped = curated::list_skipped(&state.curated, playlist_id).await?;
    if skipped.is_empty() {
        println!("No skipped tracks");
        return Ok(());
    }
    println!("Skipped tracks ({}):", skipped.len());
    for s in skipped.iter().take(50) {
        println!(
            "  {} | parsed: {} - {} | {}",
            s.youtube_title,
            s.parsed_artist.as_deref().unwrap_or(""),
            s.parsed_title.as_deref().unwrap_or(""),
            s.reason,
        );
    }
    if skipped.len() > 50 {
        println!("  ... and {} more", skipped.len() - 50);
    }
    Ok(())
}

async fn cmd_stats(state: &AppState) -> Result<()> {
    let total = curated::track_count(&state.curated, None).await?;
    let by_genre = curated::genre_counts(&state.curated).await?;
    let processed = state.ledger.processed_count(None).await?;
    let indexed = state.index.count().await.unwrap_or(0);

    println!("Curated tracks: {total}");
    for (genre, count) in by_genre {
        println!("  {genre}: {count}");
    }
    println!("Processed (ledger): {processed}");
    println!("Indexed snippets: {indexed}");
    Ok(())
}

async fn cmd_search(
    state: &AppState,
    query: String,
    limit: usize,
    filters: SearchFilters,
) -> Result<()> {
    let embedder = state.embedder.clone();
    let text = query.clone();
    let vector = tokio::task::spawn_blocking(move || embedder.embed(&text)).await??;

    let hits = state
        .index
        .search(vector, limit, filters)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if hits.is_empty() {
        println!("No results");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{:.3}  {} - {} [{} / {}]",
            hit.score,
            hit.payload["artist"].as_str().unwrap_or(""),
            hit.payload["song_title"].as_str().unwrap_or(""),
            hit.payload["primary_emotion"].as_str().unwrap_or(""),
            hit.payload["energy"].as_str().unwrap_or(""),
        );
        println!("       {}", hit.payload["ai_description"].as_str().unwrap_or(""));
        println!("       {}", hit.payload["snippet_url"].as_str().unwrap_or(""));
    }
    Ok(())
}

async fn cmd_clear_index(state: &AppState, yes: bool) -> Result<()> {
    if !yes {
        println!("This deletes every indexed snippet. Type 'yes' to confirm:");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        if line.trim().to_lowercase() != "yes" {
            println!("Aborted");
            return Ok(());
        }
    }
    state
        .index
        .clear()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Index cleared");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let state = build_state(config).await?;

    match cli.command {
        Command::Serve { host, port } => cmd_serve(state, host, port).await,
        Command::Run {
            source,
            genre,
            limit,
            dry_run,
            reprocess,
        } => {
            cmd_run(
                state,
                PipelineRequest {
                    source,
                    genre,
                    limit,
                    dry_run,
                    reprocess,
                },
            )
            .await
        }
        Command::ImportPlaylist { url, genre, dry_run } => {
            cmd_import(
                state,
                ImportRequest {
                    playlist_url: url,
                    genre,
                    dry_run,
                },
            )
            .await
        }
        Command::Playlists => cmd_playlists(&state).await,
        Command::Skipped { playlist_id } => cmd_skipped(&state, playlist_id).await,
        Command::Stats => cmd_stats(&state).await,
        Command::Search {
            query,
            limit,
            genre,
            emotion,
            energy,
        } => {
            cmd_search(
                &state,
                query,
                limit,
                SearchFilters {
                    energy,
                    primary_emotion: emotion,
                    genre,
                },
            )
            .await
        }
        Command::ClearIndex { yes } => cmd_clear_index(&state, yes).await,
    }
}
