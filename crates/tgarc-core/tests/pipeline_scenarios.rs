//! End-to-end runs of the pipeline against the in-memory source and sink.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;
use tgarc_core::{
    ChannelRef, IngestConfig, IngestError, MemorySink, MemorySource, Pipeline, PipelinePhase,
    ResolutionPolicy, RunReport, SourceError, SourceMessage, StopReason,
};
use tokio::sync::watch;

fn news() -> ChannelRef {
    ChannelRef::new(1001).with_username("news")
}

fn news_source(now: DateTime<Utc>) -> MemorySource {
    let mut source = MemorySource::new().with_channel("@news", news());
    source.push_history(&news(), now - TimeDelta::days(3), "A");
    source.push_history(&news(), now - TimeDelta::days(1), "B");
    source
}

fn rows(sink: &MemorySink) -> Vec<(String, DateTime<Utc>, String)> {
    sink.rows()
        .iter()
        .map(|r| {
            (
                r.channel().as_str().to_string(),
                r.timestamp(),
                r.text().to_string(),
            )
        })
        .collect()
}

/// Run until the live phase is reached, then shut down.
async fn run_through_backfill(source: MemorySource, sink: &MemorySink) -> RunReport {
    let live = source.live_handle();
    let config = IngestConfig::new(vec!["@news".into()]);
    let mut pipeline = Pipeline::new(config, source, sink.clone()).unwrap();
    let mut phases = pipeline.phase();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move { pipeline.run(shutdown_rx).await });
    phases
        .wait_for(|p| *p == PipelinePhase::Live)
        .await
        .unwrap();
    shutdown_tx.send(true).unwrap();
    let report = task.await.unwrap().unwrap();
    drop(live);
    report
}

async fn wait_for_rows(sink: &MemorySink, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.rows().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("rows were not written in time");
}

#[tokio::test]
async fn backfill_then_resume_then_live() {
    let now = tgarc_core::truncate_to_millis(Utc::now());
    let sink = MemorySink::new();

    let first = run_through_backfill(news_source(now), &sink).await;
    assert_eq!(first.backfilled_rows(), 2);
    assert_eq!(
        rows(&sink),
        vec![
            ("@news".to_string(), now - TimeDelta::days(3), "A".to_string()),
            ("@news".to_string(), now - TimeDelta::days(1), "B".to_string()),
        ]
    );

    // Restart against the same store: nothing new to backfill.
    let source = news_source(now);
    let live = source.live_handle();
    let config = IngestConfig::new(vec!["@news".into()]);
    let mut pipeline = Pipeline::new(config, source, sink.clone()).unwrap();
    let mut phases = pipeline.phase();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { pipeline.run(shutdown_rx).await });

    phases
        .wait_for(|p| *p == PipelinePhase::Live)
        .await
        .unwrap();
    assert_eq!(sink.rows().len(), 2);

    let live_at = Utc::now();
    live.send(SourceMessage::new(Some(news()), live_at, Some("C".into())))
        .await
        .unwrap();
    wait_for_rows(&sink, 3).await;

    shutdown_tx.send(true).unwrap();
    let second = task.await.unwrap().unwrap();

    assert_eq!(second.backfilled_rows(), 0);
    assert_eq!(second.backfill[0].skipped_stale, 1);
    assert_eq!(second.live.written, 1);
    assert_eq!(second.stop_reason, StopReason::Shutdown);

    let stored = sink.rows();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].text(), "C");
    assert_eq!(stored[2].timestamp(), tgarc_core::truncate_to_millis(live_at));
    assert_eq!(sink.batch_sizes().last(), Some(&1));
}

#[tokio::test]
async fn repeated_restarts_never_duplicate() {
    let now = Utc::now();
    let sink = MemorySink::new();
    for _ in 0..3 {
        run_through_backfill(news_source(now), &sink).await;
    }
    assert_eq!(sink.rows().len(), 2);
}

#[tokio::test]
async fn fresh_channel_backfill_has_no_gaps() {
    let now = tgarc_core::truncate_to_millis(Utc::now());
    let mut source = MemorySource::new().with_channel("@news", news());
    let expected: Vec<DateTime<Utc>> = (0..250_i64)
        .map(|i| now - TimeDelta::days(6) + TimeDelta::minutes(i * 7))
        .collect();
    for (i, ts) in expected.iter().enumerate() {
        source.push_history(&news(), *ts, format!("m{i}"));
    }

    let sink = MemorySink::new();
    let report = run_through_backfill(source, &sink).await;

    assert_eq!(report.backfilled_rows(), 250);
    let stored: Vec<DateTime<Utc>> = sink.rows().iter().map(|r| r.timestamp()).collect();
    assert_eq!(stored, expected);
    assert!(sink.rows().iter().all(|r| r.channel().as_str() == "@news"));
}

fn five_message_source(now: DateTime<Utc>) -> MemorySource {
    let mut source = MemorySource::new().with_channel("@news", news());
    for i in 0..5_i64 {
        source.push_history(&news(), now - TimeDelta::hours(10 - i), format!("m{i}"));
    }
    source
}

#[tokio::test]
async fn crash_after_partial_flush_resumes_without_duplicates() {
    let now = tgarc_core::truncate_to_millis(Utc::now());
    let sink = MemorySink::new();

    // First run: batches of 2, m0/m1 land, the batch after fails.
    sink.fail_insert_after(1, "connection reset");
    let config = IngestConfig::new(vec!["@news".into()]).with_backfill_batch_size(2);
    let mut pipeline = Pipeline::new(config, five_message_source(now), sink.clone()).unwrap();
    let (_tx, rx) = watch::channel(false);
    let err = pipeline.run(rx).await.unwrap_err();
    assert!(matches!(err, IngestError::ChannelWrite { .. }), "{err:?}");

    let texts: Vec<String> = sink.rows().iter().map(|r| r.text().to_string()).collect();
    assert_eq!(texts, vec!["m0", "m1"]);
    assert_eq!(sink.batch_sizes(), vec![2]);

    // Restart resumes from m1's timestamp.
    let report = run_through_backfill(five_message_source(now), &sink).await;
    assert_eq!(report.backfill[0].watermark, Some(now - TimeDelta::hours(9)));
    assert_eq!(report.backfilled_rows(), 3);

    let texts: Vec<String> = sink.rows().iter().map(|r| r.text().to_string()).collect();
    assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn live_disconnect_ends_run_cleanly() {
    let source = MemorySource::new().with_channel("@news", news());
    let live = source.live_handle();
    let sink = MemorySink::new();
    let mut pipeline =
        Pipeline::new(IngestConfig::new(vec!["@news".into()]), source, sink.clone()).unwrap();
    let mut phases = pipeline.phase();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { pipeline.run(shutdown_rx).await });

    phases
        .wait_for(|p| *p == PipelinePhase::Live)
        .await
        .unwrap();
    live.send(SourceMessage::new(Some(news()), Utc::now(), Some("bye".into())))
        .await
        .unwrap();
    drop(live);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.stop_reason, StopReason::Disconnected);
    assert_eq!(report.live.written, 1);
}

#[tokio::test]
async fn live_source_error_fails_run() {
    let source = MemorySource::new().with_channel("@news", news());
    let live = source.live_handle();
    let sink = MemorySink::new();
    let mut pipeline =
        Pipeline::new(IngestConfig::new(vec!["@news".into()]), source, sink.clone()).unwrap();
    let mut phases = pipeline.phase();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let result = pipeline.run(shutdown_rx).await;
        (result, pipeline.source().is_connected())
    });

    phases
        .wait_for(|p| *p == PipelinePhase::Live)
        .await
        .unwrap();
    live.fail(SourceError::Authentication("Unauthorized".into()))
        .await
        .unwrap();

    let (result, connected) = task.await.unwrap();
    match result {
        Err(IngestError::Source { phase, source }) => {
            assert_eq!(phase, "live");
            assert!(matches!(source, SourceError::Authentication(_)));
        }
        other => panic!("expected live source error, got {other:?}"),
    }
    assert!(!connected);
    assert!(sink.rows().is_empty());
}

#[tokio::test]
async fn abort_policy_stops_before_backfill() {
    let now = Utc::now();
    let source = news_source(now);
    let sink = MemorySink::new();
    let config = IngestConfig::new(vec!["@news".into(), "@nope".into()])
        .with_resolution_policy(ResolutionPolicy::Abort);
    let mut pipeline = Pipeline::new(config, source, sink.clone()).unwrap();
    let (_tx, rx) = watch::channel(false);

    let err = pipeline.run(rx).await.unwrap_err();
    assert!(matches!(err, IngestError::Resolution { .. }));
    assert!(sink.rows().is_empty());
    assert!(pipeline.source().page_requests().is_empty());
}

#[tokio::test]
async fn shutdown_before_start_skips_live() {
    let source = news_source(Utc::now());
    let sink = MemorySink::new();
    let mut pipeline =
        Pipeline::new(IngestConfig::new(vec!["@news".into()]), source, sink.clone()).unwrap();
    let (tx, rx) = watch::channel(true);

    let report = pipeline.run(rx).await.unwrap();
    drop(tx);
    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert!(report.backfill[0].interrupted);
    assert!(pipeline.source().subscribed().is_empty());
    assert!(sink.rows().is_empty());
}
