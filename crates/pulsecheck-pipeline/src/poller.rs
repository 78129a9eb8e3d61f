//! Time-bounded live collection across platforms.
//!
//! Platforms are visited round-robin. Each visit costs one token from that
//! platform's [`RateBudget`]; a platform without tokens is put in back-off
//! and the loop moves on instead of waiting on it. When a whole round does
//! no work the loop sleeps until the earliest back-off ends, bounded by the
//! deadline and woken early by cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use pulsecheck_core::Source;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::batch::{Pipeline, RunSummary, StreamFailure};
use crate::connectors::PlatformConnector;
use crate::error::PipelineError;
use crate::rate_budget::RateBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformState {
    Idle,
    Polling,
    Backoff { until: Instant },
    Draining,
    Stopped,
}

struct PlatformSlot {
    connector: Arc<dyn PlatformConnector>,
    streams: Vec<String>,
    next_stream: usize,
    halted: HashSet<String>,
    state: PlatformState,
}

impl PlatformSlot {
    fn source(&self) -> Source {
        self.connector.source()
    }

    /// Next live stream in rotation, or `None` once every stream is halted.
    fn rotate(&mut self) -> Option<String> {
        for _ in 0..self.streams.len() {
            let stream = self.streams[self.next_stream % self.streams.len()].clone();
            self.next_stream = (self.next_stream + 1) % self.streams.len();
            if !self.halted.contains(&stream) {
                return Some(stream);
            }
        }
        None
    }
}

pub struct LivePoller {
    pipeline: Arc<Pipeline>,
    slots: Vec<PlatformSlot>,
    budget: RateBudget,
    duration: Duration,
    cancel: CancellationToken,
}

impl LivePoller {
    /// A poller over `connectors`, optionally restricted to one stream id.
    ///
    /// Platforms with no matching stream start out stopped.
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        connectors: &[Arc<dyn PlatformConnector>],
        budget: RateBudget,
        duration: Duration,
        only_stream: Option<&str>,
        cancel: CancellationToken,
    ) -> Self {
        let slots = connectors
            .iter()
            .map(|connector| {
                let streams: Vec<String> = connector
                    .streams()
                    .into_iter()
                    .filter(|s| only_stream.is_none_or(|only| s.as_str() == only))
                    .collect();
                let state = if streams.is_empty() {
                    tracing::warn!(source = %connector.source(), "no stream to poll");
                    PlatformState::Stopped
                } else {
                    PlatformState::Idle
                };
                PlatformSlot {
                    connector: Arc::clone(connector),
                    streams,
                    next_stream: 0,
                    halted: HashSet::new(),
                    state,
                }
            })
            .collect();
        Self {
            pipeline,
            slots,
            budget,
            duration,
            cancel,
        }
    }

    /// Current state of `source`, if it is polled at all.
    #[must_use]
    pub fn state(&self, source: Source) -> Option<PlatformState> {
        self.slots
            .iter()
            .find(|slot| slot.source() == source)
            .map(|slot| slot.state)
    }

    fn set_all(&mut self, from_stopped: bool, state: PlatformState) {
        for slot in &mut self.slots {
            if from_stopped || slot.state != PlatformState::Stopped {
                slot.state = state;
            }
        }
    }

    /// Poll until the duration elapses or cancellation is requested.
    ///
    /// Batches are always awaited to completion, so stopping never leaves a
    /// publish half-recorded. Failures still unresolved at the end are
    /// reported in the summary; a stream that later succeeds clears its
    /// earlier transient failure.
    pub async fn run(&mut self) -> RunSummary {
        let deadline = Instant::now() + self.duration;
        let mut summary = RunSummary::default();
        let mut unresolved: HashMap<(Source, String), PipelineError> = HashMap::new();

        self.set_all(false, PlatformState::Polling);
        tracing::info!(
            platforms = self.slots.len(),
            duration_secs = self.duration.as_secs(),
            "live polling started"
        );

        'rounds: loop {
            let mut worked = false;

            for i in 0..self.slots.len() {
                let now = Instant::now();
                if self.cancel.is_cancelled() {
                    tracing::info!("cancellation requested");
                    break 'rounds;
                }
                if now >= deadline {
                    break 'rounds;
                }

                let slot = &mut self.slots[i];
                let source = slot.source();
                match slot.state {
                    PlatformState::Stopped => continue,
                    PlatformState::Backoff { until } if now < until => continue,
                    _ => {}
                }

                if !self.budget.try_take(source, now) {
                    let until = self.budget.next_refill(source).unwrap_or(deadline);
                    tracing::debug!(source = %source, "rate budget exhausted, backing off");
                    slot.state = PlatformState::Backoff { until };
                    continue;
                }
                slot.state = PlatformState::Polling;

                let Some(stream_id) = slot.rotate() else {
                    slot.state = PlatformState::Stopped;
                    continue;
                };
                let connector = Arc::clone(&slot.connector);
                worked = true;

                match self.pipeline.process_batch(connector.as_ref(), &stream_id).await {
                    Ok(report) => {
                        summary.absorb(&report);
                        unresolved.remove(&(source, stream_id));
                    }
                    Err(error) => {
                        if error.halts_stream() {
                            tracing::error!(
                                source = %source,
                                stream_id = %stream_id,
                                error = %error,
                                "stream halted"
                            );
                            let slot = &mut self.slots[i];
                            slot.halted.insert(stream_id.clone());
                            if slot.halted.len() == slot.streams.len() {
                                slot.state = PlatformState::Stopped;
                            }
                        } else {
                            tracing::warn!(
                                source = %source,
                                stream_id = %stream_id,
                                error = %error,
                                "batch failed, will retry next round"
                            );
                        }
                        unresolved.insert((source, stream_id), error);
                    }
                }
            }

            if self.slots.iter().all(|s| s.state == PlatformState::Stopped) {
                tracing::warn!("every platform stopped");
                break;
            }
            if !worked {
                let wake = self
                    .slots
                    .iter()
                    .filter_map(|s| match s.state {
                        PlatformState::Backoff { until } => Some(until),
                        _ => None,
                    })
                    .min()
                    .map_or(deadline, |t| t.min(deadline));
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        tracing::info!("cancellation requested");
                        break;
                    }
                    () = tokio::time::sleep_until(wake) => {}
                }
            }
        }

        self.set_all(false, PlatformState::Draining);
        summary.failures.extend(
            unresolved
                .into_iter()
                .map(|((source, stream_id), error)| StreamFailure {
                    source,
                    stream_id,
                    error,
                }),
        );
        self.set_all(true, PlatformState::Stopped);

        tracing::info!(
            batches = summary.batches,
            fetched = summary.fetched,
            posted = summary.posted,
            dry_run = summary.dry_run,
            failures = summary.failures.len(),
            "live polling stopped"
        );
        summary
    }
}
