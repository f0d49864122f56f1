//! Pipeline runner integration tests
//!
//! Drive the job state machine end to end with stub collaborators: event
//! ordering, ledger semantics, the rate-limit contract, conflict on
//! concurrent starts, and cooperative stop.

mod helpers;

use std::sync::Arc;

use helpers::*;
use tempfile::TempDir;
use versecut_common::events::{Event, EventBus};
use versecut_pipeline::config::BlobConfig;
use versecut_pipeline::db::ledger::Ledger;
use versecut_pipeline::index::SnippetIndex;
use versecut_pipeline::pipeline::{TrackPipeline, TrackProcessor};
use versecut_pipeline::runner::pipeline::{PipelineRequest, PipelineRunner};
use versecut_pipeline::runner::RunnerError;
use versecut_pipeline::segmenter::LyricsSegmenter;
use versecut_pipeline::skiplog::SkipLog;
use versecut_pipeline::storage::BlobStore;

struct Fixture {
    runner: Arc<PipelineRunner>,
    bus: EventBus,
    ledger: Ledger,
    index: Arc<MemoryIndex>,
    acquirer_dir: std::path::PathBuf,
    _tmp: TempDir,
}

async fn fixture_with_processor(
    tracks: usize,
    segmenter: Arc<dyn LyricsSegmenter>,
    processor: Arc<dyn TrackProcessor>,
    batch_size: usize,
    enable_batch: bool,
) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let curated = curated_pool().await;
    seed_tracks(&curated, tracks).await;
    let ledger = Ledger::new(ledger_pool().await);
    let bus = EventBus::new(64);

    let runner = Arc::new(PipelineRunner::new(
        bus.clone(),
        curated,
        ledger.clone(),
        segmenter,
        processor,
        batch_size,
        enable_batch,
        tmp.path().join("logs"),
    ));

    Fixture {
        runner,
        bus,
        ledger,
        index: Arc::new(MemoryIndex::default()),
        acquirer_dir: tmp.path().join("audio"),
        _tmp: tmp,
    }
}

/// Full stack below the runner: real track pipeline over stub collaborators
async fn fixture_full(
    tracks: usize,
    script: SegmenterScript,
    acquired_duration: f64,
    batch_size: usize,
) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let curated = curated_pool().await;
    seed_tracks(&curated, tracks).await;
    let ledger = Ledger::new(ledger_pool().await);
    let bus = EventBus::new(64);
    let index = Arc::new(MemoryIndex::default());

    let segmenter: Arc<dyn LyricsSegmenter> = Arc::new(StubSegmenter::new(script));
    let acquirer_dir = tmp.path().join("audio");
    let processor = Arc::new(TrackPipeline::new(
        Arc::new(StubAcquirer::new(&acquirer_dir, acquired_duration)),
        segmenter.clone(),
        Arc::new(StubEmbedder { fail: false }),
        index.clone(),
        Arc::new(BlobStore::new(BlobConfig::default())),
        SkipLog::new(tmp.path().join("logs")),
        2.0,
    ));

    let runner = Arc::new(PipelineRunner::new(
        bus.clone(),
        curated,
        ledger.clone(),
        segmenter,
        processor,
        batch_size,
        true,
        tmp.path().join("logs"),
    ));

    Fixture {
        runner,
        bus,
        ledger,
        index,
        acquirer_dir,
        _tmp: tmp,
    }
}

fn request(dry_run: bool, reprocess: bool) -> PipelineRequest {
    PipelineRequest {
        source: "curated".to_string(),
        genre: None,
        limit: None,
        dry_run,
        reprocess,
    }
}

#[tokio::test]
async fn happy_path_indexes_segments_and_ledgers_success() {
    let fx = fixture_full(1, SegmenterScript::Segments(3), 180.0, 10).await;

    let rx = fx.bus.subscribe();
    let (task_id, total) = fx.runner.start(request(false, false)).await.unwrap();
    assert_eq!(total, 1);

    let events = collect_task_events(rx, task_id).await;
    assert_eq!(
        event_types(&events),
        vec![
            "pipeline_started",
            "batch_segmentation_started",
            "batch_segmentation_progress",
            "batch_segmentation_complete",
            "track_start",
            "track_complete",
            "pipeline_complete",
        ]
    );

    match events.last().unwrap() {
        Event::PipelineComplete {
            processed,
            skipped,
            segments_indexed,
            ..
        } => {
            assert_eq!(*processed, 1);
            assert_eq!(*skipped, 0);
            assert_eq!(*segments_indexed, 3);
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    assert_eq!(fx.index.count().await.unwrap(), 3);
    assert_eq!(
        fx.ledger.status_of("curated", 1).await.unwrap().as_deref(),
        Some("success")
    );

    // The full audio file was cleaned up after slicing
    assert!(!fx.acquirer_dir.join("Artist 0 - Song 0.mp3").exists());
}

#[tokio::test]
async fn version_mismatch_fails_track_and_removes_download() {
    // Acquired audio is 8 seconds off the lyrics duration
    let fx = fixture_full(1, SegmenterScript::Segments(3), 172.0, 10).await;

    let rx = fx.bus.subscribe();
    let (task_id, _) = fx.runner.start(request(false, false)).await.unwrap();
    let events = collect_task_events(rx, task_id).await;

    let types = event_types(&events);
    assert!(types.contains(&"track_error"));
    assert!(!types.contains(&"track_complete"));

    if let Some(Event::TrackError { errors, .. }) =
        events.iter().find(|e| e.event_type() == "track_error")
    {
        assert!(errors.iter().any(|e| e.contains("Version mismatch")));
    } else {
        panic!("no track_error event");
    }

    assert_eq!(
        fx.ledger.status_of("curated", 1).await.unwrap().as_deref(),
        Some("failed")
    );
    assert_eq!(fx.index.count().await.unwrap(), 0);
    assert!(!fx.acquirer_dir.join("Artist 0 - Song 0.mp3").exists());
}

#[tokio::test]
async fn rate_limit_mid_batch_terminates_cleanly_without_ledger_writes() {
    // 5 tracks in batches of 2; the second batch call hits the limit
    let segmenter = Arc::new(StubSegmenter::new(SegmenterScript::RateLimitOnBatchCall {
        call: 2,
        retry_after: 90.0,
    }));
    let processor = Arc::new(GatedProcessor::new());
    let fx = fixture_with_processor(5, segmenter.clone(), processor.clone(), 2, true).await;

    let rx = fx.bus.subscribe();
    let (task_id, _) = fx.runner.start(request(false, false)).await.unwrap();
    let events = collect_task_events(rx, task_id).await;

    assert_eq!(
        event_types(&events),
        vec![
            "pipeline_started",
            "batch_segmentation_started",
            "batch_segmentation_progress",
            "rate_limited",
        ]
    );
    match events.last().unwrap() {
        Event::RateLimited {
            retry_after_seconds,
            provider,
            ..
        } => {
            assert_eq!(*retry_after_seconds, 90.0);
            assert_eq!(provider.as_deref(), Some("groq"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    // No track was ledgered for the unreached portion
    assert_eq!(fx.ledger.processed_count(None).await.unwrap(), 0);

    // The runner is idle again; a fresh start is accepted and, with the
    // stub no longer limiting, runs through all five tracks
    processor.gate.add_permits(5);
    let rx = fx.bus.subscribe();
    let (task_id, _) = fx.runner.start(request(false, false)).await.unwrap();
    let events = collect_task_events(rx, task_id).await;
    assert_eq!(events.last().unwrap().event_type(), "pipeline_complete");
}

#[tokio::test]
async fn concurrent_start_is_rejected_until_terminal() {
    let processor = Arc::new(GatedProcessor::new());
    let segmenter = Arc::new(StubSegmenter::new(SegmenterScript::Segments(1)));
    let fx =
        fixture_with_processor(2, segmenter, processor.clone(), 10, false).await;

    let rx = fx.bus.subscribe();
    let (task_id, total) = fx.runner.start(request(false, false)).await.unwrap();
    assert_eq!(total, 2);

    // While the job is in flight, a second start conflicts
    let err = fx.runner.start(request(false, false)).await.unwrap_err();
    assert!(matches!(err, RunnerError::Busy(_)));

    processor.gate.add_permits(2);
    let events = collect_task_events(rx, task_id).await;
    assert_eq!(events.last().unwrap().event_type(), "pipeline_complete");

    // After the terminal event, starting again succeeds; both tracks are
    // ledgered so the candidate list is empty
    let (_, total) = fx.runner.start(request(false, false)).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn stop_is_observed_between_tracks_and_resume_skips_ledgered_work() {
    let processor = Arc::new(GatedProcessor::new());
    let segmenter = Arc::new(StubSegmenter::new(SegmenterScript::Segments(1)));
    let fx =
        fixture_with_processor(5, segmenter, processor.clone(), 10, false).await;

    let mut rx = fx.bus.subscribe();
    let (task_id, _) = fx.runner.start(request(false, false)).await.unwrap();

    assert_eq!(next_task_event(&mut rx, task_id).await.event_type(), "pipeline_started");
    processor.gate.add_permits(1);
    assert_eq!(next_task_event(&mut rx, task_id).await.event_type(), "track_start");
    assert_eq!(next_task_event(&mut rx, task_id).await.event_type(), "track_complete");

    // Track 2 is now in flight; request the stop mid-track, then let it finish
    assert_eq!(next_task_event(&mut rx, task_id).await.event_type(), "track_start");
    assert!(fx.runner.stop());
    processor.gate.add_permits(10);

    // Track 2 still reaches its terminal event; the stop lands before track 3
    assert_eq!(next_task_event(&mut rx, task_id).await.event_type(), "track_complete");
    assert_eq!(next_task_event(&mut rx, task_id).await.event_type(), "pipeline_stopped");

    assert_eq!(processor.processed.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(fx.ledger.processed_count(None).await.unwrap(), 2);

    // Stop with nothing running reports false
    assert!(!fx.runner.stop());

    // Restart picks up only the unledgered remainder
    let rx = fx.bus.subscribe();
    let (task_id, total) = fx.runner.start(request(false, false)).await.unwrap();
    assert_eq!(total, 3);
    let events = collect_task_events(rx, task_id).await;
    assert_eq!(events.last().unwrap().event_type(), "pipeline_complete");
    assert_eq!(fx.ledger.processed_count(None).await.unwrap(), 5);
}

#[tokio::test]
async fn failed_tracks_retry_only_with_reprocess() {
    let fx = fixture_full(1, SegmenterScript::FailAll, 180.0, 10).await;

    let rx = fx.bus.subscribe();
    let (task_id, _) = fx.runner.start(request(false, false)).await.unwrap();
    let events = collect_task_events(rx, task_id).await;
    assert!(event_types(&events).contains(&"track_error"));
    assert_eq!(
        fx.ledger.status_of("curated", 1).await.unwrap().as_deref(),
        Some("failed")
    );

    // failed is excluded by default
    let rx = fx.bus.subscribe();
    let (task_id, total) = fx.runner.start(request(false, false)).await.unwrap();
    assert_eq!(total, 0);
    collect_task_events(rx, task_id).await;

    // but reprocess=true includes it again
    let rx = fx.bus.subscribe();
    let (task_id, total) = fx.runner.start(request(false, true)).await.unwrap();
    assert_eq!(total, 1);
    collect_task_events(rx, task_id).await;
}

#[tokio::test]
async fn dry_run_counts_without_ledger_or_index_writes() {
    let fx = fixture_full(1, SegmenterScript::Segments(2), 180.0, 10).await;

    let rx = fx.bus.subscribe();
    let (task_id, _) = fx.runner.start(request(true, false)).await.unwrap();
    let events = collect_task_events(rx, task_id).await;

    match events.iter().find(|e| e.event_type() == "track_complete") {
        Some(Event::TrackComplete {
            segments_indexed,
            dry_run,
            ..
        }) => {
            assert_eq!(*segments_indexed, 2);
            assert!(dry_run);
        }
        other => panic!("expected track_complete, got {other:?}"),
    }

    assert_eq!(fx.ledger.processed_count(None).await.unwrap(), 0);
    assert_eq!(fx.index.count().await.unwrap(), 0);

    // The segmentation report was written for inspection
    let logs = fx._tmp.path().join("logs");
    let report = std::fs::read_dir(&logs)
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("segmentation_results_")
        });
    assert!(report.is_some(), "dry-run report file missing");
}

#[tokio::test]
async fn lrclib_source_is_reserved_and_empty() {
    let fx = fixture_full(3, SegmenterScript::Segments(1), 180.0, 10).await;

    let rx = fx.bus.subscribe();
    let (task_id, total) = fx
        .runner
        .start(PipelineRequest {
            source: "lrclib".to_string(),
            genre: None,
            limit: None,
            dry_run: false,
            reprocess: false,
        })
        .await
        .unwrap();
    assert_eq!(total, 0);
    let events = collect_task_events(rx, task_id).await;
    assert_eq!(events.last().unwrap().event_type(), "pipeline_complete");

    // Unknown sources are rejected outright
    let err = fx
        .runner
        .start(PipelineRequest {
            source: "mixtape".to_string(),
            genre: None,
            limit: None,
            dry_run: false,
            reprocess: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::InvalidRequest(_)));
}
