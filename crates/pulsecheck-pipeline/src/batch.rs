//! One bounded Fetch → Score → Select → Publish pass over a stream, and the
//! batch-mode runner that drains every configured stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use pulsecheck_core::{
    advance_cursor, AppConfig, CoreError, Cursor, Record, SentimentResult, Source, Storage,
    TargetPlatform, DEFAULT_RECENT_WINDOW,
};

use crate::connectors::PlatformConnector;
use crate::cursor_store::CursorStore;
use crate::dispatcher::{Publish, PublishOutcome};
use crate::error::PipelineError;
use crate::fetcher::BatchFetcher;
use crate::filter::{pending_targets, select, SelectionCriteria};
use crate::scorer::SentimentScorer;

/// Per-run knobs for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub confidence_threshold: f64,
    pub max_age: chrono::Duration,
    /// Records selected for publication across the whole run.
    pub post_cap: usize,
    pub fetch_batch_size: usize,
    /// Replaces each source's default routing when set.
    pub targets: Option<Vec<TargetPlatform>>,
    pub recent_window: usize,
}

impl PipelineSettings {
    /// Settings from config plus the per-run command-line choices.
    #[must_use]
    pub fn from_app_config(
        config: &AppConfig,
        post_cap: usize,
        max_age_days: i64,
        targets: Option<Vec<TargetPlatform>>,
    ) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_age: chrono::Duration::days(max_age_days),
            post_cap,
            fetch_batch_size: config.fetch_batch_size,
            targets,
            recent_window: DEFAULT_RECENT_WINDOW,
        }
    }
}

/// What one [`Pipeline::process_batch`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub fetched: usize,
    pub selected: usize,
    pub posted: usize,
    pub already_posted: usize,
    pub dry_run: usize,
    /// Records the classifier refused; they count as done.
    pub unscorable: usize,
    /// Posts refused permanently; their records still count as done.
    pub rejected: usize,
    /// Eligible records held back by the run's post cap.
    pub deferred: usize,
    /// Records left for a later cycle after posting stayed unavailable.
    pub unavailable: usize,
    pub cursor: Option<Cursor>,
}

impl BatchReport {
    /// Every fetched record reached a final outcome.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.deferred == 0 && self.unavailable == 0
    }
}

/// A stream that ended the run with an unresolved error.
#[derive(Debug)]
pub struct StreamFailure {
    pub source: Source,
    pub stream_id: String,
    pub error: PipelineError,
}

/// Totals for a batch or live run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub batches: usize,
    pub fetched: usize,
    pub posted: usize,
    pub already_posted: usize,
    pub dry_run: usize,
    pub unscorable: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub unavailable: usize,
    pub failures: Vec<StreamFailure>,
}

impl RunSummary {
    pub fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.fetched += report.fetched;
        self.posted += report.posted;
        self.already_posted += report.already_posted;
        self.dry_run += report.dry_run;
        self.unscorable += report.unscorable;
        self.rejected += report.rejected;
        self.deferred += report.deferred;
        self.unavailable += report.unavailable;
    }

    /// No stream failed and nothing was left waiting on an unavailable target.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.unavailable == 0
    }
}

/// Cursor after marking the `done` records of a fetched batch.
///
/// Watermark streams only move through the contiguous done prefix so a
/// failed record is fetched again; recent-id streams admit every done
/// record.
fn next_cursor(
    current: Option<&Cursor>,
    source: Source,
    records: &[Record],
    done: &[bool],
    window: usize,
) -> Result<Option<Cursor>, CoreError> {
    let mut cursor = current.cloned();
    for (record, &finished) in records.iter().zip(done) {
        if !finished {
            if source.has_monotonic_ids() {
                break;
            }
            continue;
        }
        cursor = Some(advance_cursor(
            cursor.as_ref(),
            source,
            &record.record_id,
            window,
        )?);
    }
    Ok(cursor)
}

/// The resumable ingestion pipeline shared by batch and live mode.
pub struct Pipeline {
    storage: Arc<dyn Storage>,
    cursors: CursorStore,
    fetcher: BatchFetcher,
    scorer: SentimentScorer,
    publisher: Arc<dyn Publish>,
    settings: PipelineSettings,
    remaining_posts: AtomicUsize,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        cursors: CursorStore,
        fetcher: BatchFetcher,
        scorer: SentimentScorer,
        publisher: Arc<dyn Publish>,
        settings: PipelineSettings,
    ) -> Self {
        let remaining_posts = AtomicUsize::new(settings.post_cap);
        Self {
            storage,
            cursors,
            fetcher,
            scorer,
            publisher,
            settings,
            remaining_posts,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn targets_for(&self, source: Source) -> Vec<TargetPlatform> {
        let configured = self
            .settings
            .targets
            .as_deref()
            .unwrap_or_else(|| source.default_targets());
        configured
            .iter()
            .copied()
            .filter(|&t| {
                let supported = self.publisher.supports(t);
                if !supported {
                    tracing::debug!(source = %source, target = %t, "no publisher for target");
                }
                supported
            })
            .collect()
    }

    /// Take up to `wanted` slots from the run's post cap.
    fn reserve_posts(&self, wanted: usize) -> usize {
        let mut granted = 0;
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .remaining_posts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                granted = wanted.min(remaining);
                Some(remaining - granted)
            });
        granted
    }

    /// Run one bounded batch on `stream_id`.
    ///
    /// Records and their sentiment results are stored before selection. The
    /// cursor moves only past records whose outcomes are durable; a record
    /// the classifier refused, or whose post was refused permanently, counts
    /// as done.
    ///
    /// # Errors
    ///
    /// Fetch, scoring and storage failures leave the cursor untouched. A
    /// stream-halting publish error (gone, unauthorized, ambiguous) stops the
    /// batch after advancing over the records already finished, then is
    /// returned.
    pub async fn process_batch(
        &self,
        connector: &dyn PlatformConnector,
        stream_id: &str,
    ) -> Result<BatchReport, PipelineError> {
        let source = connector.source();
        let cursor = self.cursors.get(source, stream_id).await?;
        let records = self
            .fetcher
            .fetch(
                connector,
                stream_id,
                cursor.as_ref(),
                self.settings.fetch_batch_size,
            )
            .await?;

        let mut report = BatchReport {
            fetched: records.len(),
            cursor: cursor.clone(),
            ..BatchReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        self.storage.save_records(&records).await?;
        let scored_batch = self.scorer.score(&records).await?;
        self.storage
            .upsert_sentiments(&scored_batch.results)
            .await?;
        for (record_id, reason) in &scored_batch.unscorable {
            tracing::warn!(
                source = %source,
                stream_id,
                record_id = %record_id,
                reason = %reason,
                "skipping record the classifier refused"
            );
        }
        report.unscorable = scored_batch.unscorable.len();

        let targets = self.targets_for(source);
        let record_ids: Vec<String> = records.iter().map(|r| r.record_id.clone()).collect();
        let posted = self.storage.posted_keys(source, &record_ids).await?;

        let by_id: HashMap<&str, &Record> =
            records.iter().map(|r| (r.record_id.as_str(), r)).collect();
        let scored: Vec<(Record, SentimentResult)> = scored_batch
            .results
            .into_iter()
            .filter_map(|result| {
                by_id
                    .get(result.record_id.as_str())
                    .map(|record| ((*record).clone(), result))
            })
            .collect();
        let now = Utc::now();
        let mut criteria = SelectionCriteria {
            threshold: self.settings.confidence_threshold,
            max_age: self.settings.max_age,
            cap: usize::MAX,
            targets: targets.clone(),
        };
        let eligible = select(&scored, &criteria, now, &posted);
        criteria.cap = self.reserve_posts(eligible.len());
        let selected = select(&scored, &criteria, now, &posted);
        report.selected = selected.len();
        report.deferred = eligible.len() - selected.len();

        let index: HashMap<&str, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.record_id.as_str(), i))
            .collect();
        // Eligible records stay pending until published; those that missed
        // the cap wait for a later run.
        let mut done = vec![true; records.len()];
        for (record, _) in &eligible {
            done[index[record.record_id.as_str()]] = false;
        }

        let mut halt: Option<PipelineError> = None;
        'records: for (record, result) in &selected {
            let mut finished = true;
            for target in pending_targets(record, &targets, &posted) {
                match self.publisher.publish(record, result, target).await {
                    Ok(PublishOutcome::Posted(_)) => report.posted += 1,
                    Ok(PublishOutcome::AlreadyPosted(_)) => report.already_posted += 1,
                    Ok(PublishOutcome::DryRun { .. }) => report.dry_run += 1,
                    Err(e) if e.is_permanent_per_record() => {
                        tracing::warn!(
                            source = %source,
                            stream_id,
                            record_id = %record.record_id,
                            target = %target,
                            error = %e,
                            "skipping record"
                        );
                        report.rejected += 1;
                    }
                    Err(e @ PipelineError::PublishUnavailable { .. }) => {
                        tracing::warn!(
                            source = %source,
                            stream_id,
                            record_id = %record.record_id,
                            target = %target,
                            error = %e,
                            "leaving record for a later cycle"
                        );
                        finished = false;
                    }
                    Err(e) => {
                        halt = Some(e);
                        break 'records;
                    }
                }
            }
            if finished {
                done[index[record.record_id.as_str()]] = true;
            } else {
                report.unavailable += 1;
            }
        }

        let advanced = next_cursor(
            cursor.as_ref(),
            source,
            &records,
            &done,
            self.settings.recent_window,
        )?;
        if let Some(new) = &advanced {
            if cursor.as_ref() != Some(new) {
                self.cursors.advance(source, stream_id, new).await?;
            }
        }
        report.cursor = advanced;

        if let Some(e) = halt {
            tracing::error!(
                source = %source,
                stream_id,
                first_id = %records[0].record_id,
                last_id = %records[records.len() - 1].record_id,
                error = %e,
                "halting stream"
            );
            return Err(e);
        }

        tracing::info!(
            source = %source,
            stream_id,
            fetched = report.fetched,
            selected = report.selected,
            posted = report.posted,
            dry_run = report.dry_run,
            unscorable = report.unscorable,
            rejected = report.rejected,
            deferred = report.deferred,
            unavailable = report.unavailable,
            "batch complete"
        );
        Ok(report)
    }

    /// Drain one stream: batches until it runs dry, stops making progress,
    /// or fails.
    async fn drain_stream(
        &self,
        connector: &dyn PlatformConnector,
        stream_id: &str,
        summary: &mut RunSummary,
    ) {
        loop {
            match self.process_batch(connector, stream_id).await {
                Ok(report) => {
                    summary.absorb(&report);
                    let drained = report.fetched < self.settings.fetch_batch_size;
                    let stuck = report.fetched > 0 && !report.is_complete();
                    if drained || stuck {
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(
                        source = %connector.source(),
                        stream_id,
                        error = %error,
                        "stream failed"
                    );
                    summary.failures.push(StreamFailure {
                        source: connector.source(),
                        stream_id: stream_id.to_owned(),
                        error,
                    });
                    return;
                }
            }
        }
    }

    /// Batch mode: drain every stream of every connector once.
    ///
    /// A failing stream is recorded in the summary and the run moves on to
    /// the next one.
    pub async fn run_batch(&self, connectors: &[Arc<dyn PlatformConnector>]) -> RunSummary {
        let mut summary = RunSummary::default();
        for connector in connectors {
            for stream_id in connector.streams() {
                tracing::info!(source = %connector.source(), stream_id = %stream_id, "draining stream");
                self.drain_stream(connector.as_ref(), &stream_id, &mut summary)
                    .await;
            }
        }
        tracing::info!(
            batches = summary.batches,
            fetched = summary.fetched,
            posted = summary.posted,
            dry_run = summary.dry_run,
            failures = summary.failures.len(),
            "batch run finished"
        );
        summary
    }
}
