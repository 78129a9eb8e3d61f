//! Live poller behaviour on a paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{pipeline, record, settings, KeywordClassifier, ScriptedSource};
use pulsecheck_core::{Source, Storage};
use pulsecheck_pipeline::{
    ConnectorError, CursorStore, DryRunDispatcher, LivePoller, MemoryStorage, PlatformConnector,
    PlatformState, RateBudget,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn poller(
    storage: &Arc<MemoryStorage>,
    connectors: &[Arc<dyn PlatformConnector>],
    budget: RateBudget,
    duration: Duration,
    cancel: CancellationToken,
) -> LivePoller {
    let p = pipeline(
        storage.clone(),
        CursorStore::durable(storage.clone()),
        KeywordClassifier::new(),
        Arc::new(DryRunDispatcher::new(Vec::new())),
        settings(5, 10),
    );
    LivePoller::new(Arc::new(p), connectors, budget, duration, None, cancel)
}

fn budget(capacity: u32, sources: &[Source]) -> RateBudget {
    RateBudget::new(capacity, Duration::from_secs(10), sources, Instant::now())
}

#[tokio::test(start_paused = true)]
async fn exhausted_platform_does_not_block_the_others() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(
        Source::Discord,
        &["chan"],
        vec![record(Source::Discord, "chan", "1", "meh")],
    );
    let x = ScriptedSource::new(
        Source::X,
        &["42"],
        vec![record(Source::X, "42", "100", "meh")],
    );
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone(), x.clone()];

    let mut rate = budget(5, &[Source::Discord, Source::X]);
    assert!(rate.try_take(Source::Discord, Instant::now()));

    let mut live = poller(
        &storage,
        &connectors,
        rate,
        Duration::from_secs(5),
        CancellationToken::new(),
    );
    let summary = live.run().await;

    assert_eq!(discord.calls(), 0);
    assert_eq!(x.calls(), 1);
    assert_eq!(summary.batches, 1);
    assert_eq!(live.state(Source::Discord), Some(PlatformState::Stopped));
    assert_eq!(live.state(Source::X), Some(PlatformState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn platforms_are_visited_once_per_refill() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(Source::Discord, &["chan"], Vec::new());
    let x = ScriptedSource::new(Source::X, &["42"], Vec::new());
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone(), x.clone()];

    let started = Instant::now();
    let mut live = poller(
        &storage,
        &connectors,
        budget(1, &[Source::Discord, Source::X]),
        Duration::from_secs(35),
        CancellationToken::new(),
    );
    live.run().await;

    // Tokens at 0 s, 10 s, 20 s and 30 s.
    assert_eq!(discord.calls(), 4);
    assert_eq!(x.calls(), 4);
    assert!(Instant::now() >= started + Duration::from_secs(35));
}

#[tokio::test(start_paused = true)]
async fn streams_of_a_platform_rotate() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(
        Source::Discord,
        &["a", "b"],
        vec![
            record(Source::Discord, "a", "1", "meh"),
            record(Source::Discord, "b", "2", "meh"),
        ],
    );
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone()];

    let mut live = poller(
        &storage,
        &connectors,
        budget(1, &[Source::Discord]),
        Duration::from_secs(15),
        CancellationToken::new(),
    );
    let summary = live.run().await;

    assert_eq!(summary.batches, 2);
    assert!(storage.get_cursor(Source::Discord, "a").await.unwrap().is_some());
    assert!(storage.get_cursor(Source::Discord, "b").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_start_runs_nothing() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(Source::Discord, &["chan"], Vec::new());
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone()];
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut live = poller(
        &storage,
        &connectors,
        budget(5, &[Source::Discord]),
        Duration::from_secs(60),
        cancel,
    );
    let summary = live.run().await;

    assert_eq!(discord.calls(), 0);
    assert_eq!(summary.batches, 0);
    assert_eq!(live.state(Source::Discord), Some(PlatformState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn cancellation_wakes_a_sleeping_poller() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(Source::Discord, &["chan"], Vec::new());
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone()];
    let cancel = CancellationToken::new();

    let mut live = poller(
        &storage,
        &connectors,
        budget(1, &[Source::Discord]),
        Duration::from_secs(3600),
        cancel.clone(),
    );
    let started = Instant::now();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });
    live.run().await;
    stopper.await.unwrap();

    assert_eq!(discord.calls(), 1);
    assert!(Instant::now() < started + Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn gone_stream_halts_and_is_reported() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(Source::Discord, &["chan"], Vec::new());
    discord.fail_with(vec![ConnectorError::StreamGone("403 Missing Access".into())]);
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone()];

    let mut live = poller(
        &storage,
        &connectors,
        budget(5, &[Source::Discord]),
        Duration::from_secs(600),
        CancellationToken::new(),
    );
    let summary = live.run().await;

    assert_eq!(discord.calls(), 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].error.halts_stream());
    assert_eq!(storage.get_cursor(Source::Discord, "chan").await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_clears_once_the_stream_recovers() {
    let storage = Arc::new(MemoryStorage::default());
    let discord = ScriptedSource::new(
        Source::Discord,
        &["chan"],
        vec![record(Source::Discord, "chan", "9", "meh")],
    );
    discord.fail_with(vec![
        ConnectorError::Transient("502".into()),
        ConnectorError::Transient("502".into()),
        ConnectorError::Transient("502".into()),
    ]);
    let connectors: Vec<Arc<dyn PlatformConnector>> = vec![discord.clone()];

    let mut live = poller(
        &storage,
        &connectors,
        budget(1, &[Source::Discord]),
        Duration::from_secs(15),
        CancellationToken::new(),
    );
    let summary = live.run().await;

    assert!(summary.is_clean());
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.fetched, 1);
}
