//! `batch` and `live` command handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pulsecheck_core::{AppConfig, Source, Storage, TargetPlatform};
use pulsecheck_db::{PgStorage, PoolConfig};
use pulsecheck_pipeline::{
    build_classifier, build_connectors, BatchFetcher, Connectors, CursorStore, DryRunDispatcher,
    LivePoller, Pipeline, PipelineSettings, PlatformConnector, PosterDispatcher, PostingConnector,
    Publish, RateBudget, RunSummary, SentimentScorer,
};
use tokio_util::sync::CancellationToken;

use crate::{LiveArgs, RunArgs, UsageError};

/// Keep only the connectors the user asked for.
///
/// # Errors
///
/// Returns [`UsageError`] if a requested platform has no credentials, or if
/// nothing is left to collect from.
pub(crate) fn select_sources(
    available: Vec<Arc<dyn PlatformConnector>>,
    requested: &[Source],
) -> Result<Vec<Arc<dyn PlatformConnector>>, UsageError> {
    if let Some(missing) = requested
        .iter()
        .find(|s| !available.iter().any(|c| c.source() == **s))
    {
        return Err(UsageError(format!(
            "--platform {missing} requested but {missing} is not configured"
        )));
    }

    let selected: Vec<Arc<dyn PlatformConnector>> = available
        .into_iter()
        .filter(|c| requested.is_empty() || requested.contains(&c.source()))
        .collect();
    if selected.is_empty() {
        return Err(UsageError(
            "no platform is configured; set DISCORD_*, BLUESKY_* or X_* credentials".to_string(),
        ));
    }
    Ok(selected)
}

/// Cursor store and publisher for a run. A dry run treats exactly the
/// configured targets as available, so its summary matches what a live run
/// would attempt.
pub(crate) fn build_publisher(
    dry_run: bool,
    storage: &Arc<dyn Storage>,
    targets: HashMap<TargetPlatform, Arc<dyn PostingConnector>>,
    max_retries: u32,
    backoff_base_ms: u64,
) -> (CursorStore, Arc<dyn Publish>) {
    if dry_run {
        let mut configured: Vec<TargetPlatform> = targets.keys().copied().collect();
        configured.sort();
        tracing::info!(
            targets = ?configured,
            "dry run: posts are logged, cursors stay in memory"
        );
        (
            CursorStore::ephemeral(Arc::clone(storage)),
            Arc::new(DryRunDispatcher::new(configured)),
        )
    } else {
        (
            CursorStore::durable(Arc::clone(storage)),
            Arc::new(PosterDispatcher::new(
                Arc::clone(storage),
                targets,
                max_retries,
                backoff_base_ms,
            )),
        )
    }
}

async fn build_pipeline(
    config: &AppConfig,
    args: &RunArgs,
) -> anyhow::Result<(Pipeline, Vec<Arc<dyn PlatformConnector>>)> {
    let classifier = build_classifier(config)?;
    let Connectors { sources, targets } = build_connectors(config)?;
    let sources = select_sources(sources, &args.platforms)?;

    let pool_config = PoolConfig::from_app_config(config);
    let pool = pulsecheck_db::connect_pool(&config.database_url, pool_config).await?;
    pulsecheck_db::run_migrations(&pool).await?;
    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));

    let (cursors, publisher) = build_publisher(
        args.dry_run,
        &storage,
        targets,
        config.max_retries,
        config.retry_backoff_base_ms,
    );

    let target_override = (!args.targets.is_empty()).then(|| args.targets.clone());
    let settings = PipelineSettings::from_app_config(
        config,
        args.limit,
        i64::from(args.days),
        target_override,
    );

    let pipeline = Pipeline::new(
        storage,
        cursors,
        BatchFetcher::new(config.max_retries, config.retry_backoff_base_ms),
        SentimentScorer::new(
            classifier,
            config.score_batch_size,
            config.max_retries,
            config.retry_backoff_base_ms,
        ),
        publisher,
        settings,
    );
    Ok((pipeline, sources))
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!(
        "batches: {}  fetched: {}  {}: {}  already posted: {}  unscorable: {}  rejected: {}  deferred: {}  unavailable: {}",
        summary.batches,
        summary.fetched,
        if dry_run { "would post" } else { "posted" },
        if dry_run { summary.dry_run } else { summary.posted },
        summary.already_posted,
        summary.unscorable,
        summary.rejected,
        summary.deferred,
        summary.unavailable,
    );
    for failure in &summary.failures {
        println!(
            "FAILED {}/{}: {}",
            failure.source, failure.stream_id, failure.error
        );
    }
}

/// Drain every selected stream once. Returns whether the run was clean.
///
/// # Errors
///
/// Returns an error if configuration, connectors or the database cannot be
/// set up. Per-stream failures are reported in the summary instead.
pub(crate) async fn run_batch(config: &AppConfig, args: &RunArgs) -> anyhow::Result<bool> {
    let (pipeline, sources) = build_pipeline(config, args).await?;
    let summary = pipeline.run_batch(&sources).await;
    print_summary(&summary, args.dry_run);
    Ok(summary.is_clean())
}

/// Poll until the duration elapses or Ctrl-C. Returns whether the run was
/// clean.
///
/// # Errors
///
/// Same setup failures as [`run_batch`].
pub(crate) async fn run_live(config: &AppConfig, args: &LiveArgs) -> anyhow::Result<bool> {
    let (pipeline, sources) = build_pipeline(config, &args.run).await?;

    let platforms: Vec<Source> = sources.iter().map(|c| c.source()).collect();
    let budget = RateBudget::new(
        config.rate_capacity,
        Duration::from_secs(config.rate_refill_secs),
        &platforms,
        tokio::time::Instant::now(),
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received ctrl-c, stopping after the current batch");
                on_ctrl_c.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    let mut poller = LivePoller::new(
        Arc::new(pipeline),
        &sources,
        budget,
        Duration::from_secs(args.duration_minutes.saturating_mul(60)),
        args.stream.as_deref(),
        cancel,
    );
    let summary = poller.run().await;
    print_summary(&summary, args.run.dry_run);
    Ok(summary.is_clean())
}
