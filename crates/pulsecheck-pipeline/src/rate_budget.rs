//! Per-platform token buckets for one live run.

use std::collections::HashMap;
use std::time::Duration;

use pulsecheck_core::Source;
use tokio::time::Instant;

const MIN_REFILL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token buckets keyed by source. Never persisted: every run builds a fresh
/// one that starts with a single token per platform.
#[derive(Debug)]
pub struct RateBudget {
    capacity: u32,
    refill: Duration,
    buckets: HashMap<Source, Bucket>,
}

impl RateBudget {
    #[must_use]
    pub fn new(capacity: u32, refill: Duration, sources: &[Source], now: Instant) -> Self {
        let capacity = capacity.max(1);
        let buckets = sources
            .iter()
            .map(|&source| {
                (
                    source,
                    Bucket {
                        tokens: 1,
                        last_refill: now,
                    },
                )
            })
            .collect();
        Self {
            capacity,
            refill: refill.max(MIN_REFILL),
            buckets,
        }
    }

    fn refill_bucket(&mut self, source: Source, now: Instant) -> Option<&mut Bucket> {
        let capacity = self.capacity;
        let refill = self.refill;
        let bucket = self.buckets.get_mut(&source)?;
        if bucket.tokens >= capacity {
            // A full bucket earns nothing while it waits.
            bucket.last_refill = now;
            return Some(bucket);
        }
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let earned = u32::try_from(elapsed.as_nanos() / refill.as_nanos()).unwrap_or(u32::MAX);
        if earned > 0 {
            bucket.tokens = bucket.tokens.saturating_add(earned).min(capacity);
            bucket.last_refill = if bucket.tokens == capacity {
                now
            } else {
                bucket.last_refill + refill * earned
            };
        }
        Some(bucket)
    }

    /// Take one token for `source` if one is available at `now`.
    ///
    /// Unknown sources never get a token.
    pub fn try_take(&mut self, source: Source, now: Instant) -> bool {
        match self.refill_bucket(source, now) {
            Some(bucket) if bucket.tokens > 0 => {
                bucket.tokens -= 1;
                true
            }
            _ => false,
        }
    }

    /// Tokens available to `source` at `now`.
    pub fn available(&mut self, source: Source, now: Instant) -> u32 {
        self.refill_bucket(source, now).map_or(0, |b| b.tokens)
    }

    /// When `source` next earns a token.
    #[must_use]
    pub fn next_refill(&self, source: Source) -> Option<Instant> {
        self.buckets
            .get(&source)
            .map(|bucket| bucket.last_refill + self.refill)
    }
}
