//! Publication of selected records, at most once per posting key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use pulsecheck_core::{
    AttemptStart, InsertOutcome, PostingAttempt, PostingKey, PostingRecord, Record,
    SentimentResult, Source, Storage, TargetPlatform,
};

use crate::connectors::{ConnectorError, PostingConnector};
use crate::error::PipelineError;
use crate::retry::{backoff_delay, Transient};

const SNIPPET_CHARS: usize = 50;
const MAX_RECORD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Posted(PostingRecord),
    /// A posting record already existed; nothing was sent.
    AlreadyPosted(PostingRecord),
    /// Dry run: the post that would have been sent.
    DryRun { key: PostingKey, text: String },
}

#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(
        &self,
        record: &Record,
        result: &SentimentResult,
        target: TargetPlatform,
    ) -> Result<PublishOutcome, PipelineError>;

    /// Whether a posting connector is available for `target`.
    fn supports(&self, target: TargetPlatform) -> bool;
}

fn platform_label(source: Source) -> &'static str {
    match source {
        Source::Discord => "Discord",
        Source::Bluesky => "Bluesky",
        Source::X => "X",
    }
}

/// Post text announcing a positive finding.
#[must_use]
pub fn compose_post(record: &Record, result: &SentimentResult) -> String {
    let flattened = record.text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut snippet: String = flattened.chars().take(SNIPPET_CHARS).collect();
    if flattened.chars().count() > SNIPPET_CHARS {
        snippet.push_str("...");
    }
    format!(
        "PulseCheck: {} users are buzzing positively about '{snippet}' (Confidence: {:.2})",
        platform_label(record.source),
        result.confidence
    )
}

/// One async mutex per posting key.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<PostingKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn get(&self, key: &PostingKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

/// Live publisher: posts through the target's connector and records the
/// outcome before reporting success.
pub struct PosterDispatcher {
    storage: Arc<dyn Storage>,
    connectors: HashMap<TargetPlatform, Arc<dyn PostingConnector>>,
    locks: KeyedLocks,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl PosterDispatcher {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        connectors: HashMap<TargetPlatform, Arc<dyn PostingConnector>>,
        max_retries: u32,
        backoff_base_ms: u64,
    ) -> Self {
        Self {
            storage,
            connectors,
            locks: KeyedLocks::default(),
            max_retries,
            backoff_base_ms,
        }
    }

    /// Send `text`, resolving ambiguous outcomes by looking the post up.
    async fn send(
        &self,
        connector: &dyn PostingConnector,
        key: &PostingKey,
        text: &str,
    ) -> Result<String, PipelineError> {
        let mut attempt = 0u32;
        loop {
            let err = match connector.post(text).await {
                Ok(id) => return Ok(id),
                Err(err) => err,
            };

            match err {
                ConnectorError::Ambiguous(reason) => match connector.find_post(text).await {
                    Ok(Some(id)) => {
                        tracing::info!(key = %key, external_post_id = %id, "ambiguous post found on platform");
                        return Ok(id);
                    }
                    Ok(None) => {
                        tracing::warn!(key = %key, reason = %reason, "ambiguous post confirmed absent");
                    }
                    Err(lookup) => {
                        return Err(PipelineError::AmbiguousPostOutcome {
                            key: key.clone(),
                            reason: format!("{reason}; lookup failed: {lookup}"),
                        });
                    }
                },
                ConnectorError::Rejected(reason) => {
                    return Err(PipelineError::PostRejected {
                        key: key.clone(),
                        reason,
                    });
                }
                ConnectorError::Unauthorized(reason) => {
                    return Err(PipelineError::Unauthorized {
                        platform: key.target.to_string(),
                        reason,
                    });
                }
                ref e if e.is_transient() => {}
                other => {
                    return Err(PipelineError::PublishUnavailable {
                        key: key.clone(),
                        reason: other.to_string(),
                    });
                }
            }

            if attempt >= self.max_retries {
                return Err(PipelineError::PublishUnavailable {
                    key: key.clone(),
                    reason: format!("gave up after {} attempts", attempt + 1),
                });
            }
            attempt += 1;
            let delay = backoff_delay(attempt, self.backoff_base_ms);
            tracing::warn!(
                key = %key,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying post"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Settle the attempt for a publish that failed. An ambiguous outcome
    /// stays on file so the key is never posted blindly again; any other
    /// failure means nothing was published and the attempt is dropped.
    async fn settle_failure(&self, key: &PostingKey, error: PipelineError) -> PipelineError {
        if let PipelineError::AmbiguousPostOutcome { reason, .. } = &error {
            if let Err(e) = self.storage.mark_posting_ambiguous(key, reason).await {
                tracing::warn!(key = %key, error = %e, "failed to flag ambiguous attempt");
            }
            return error;
        }
        if let Err(e) = self.storage.clear_posting_attempt(key).await {
            // The attempt stays pending and will be reported as ambiguous.
            tracing::warn!(key = %key, error = %e, "failed to clear posting attempt");
        }
        error
    }

    /// Write the posting record. The post is already public, so a storage
    /// failure here leaves the key unreconciled.
    async fn record_posting(&self, posting: PostingRecord) -> Result<PublishOutcome, PipelineError> {
        let key = posting.key();
        let mut last_error = None;
        for attempt in 1..=MAX_RECORD_ATTEMPTS {
            match self.storage.insert_posting(&posting).await {
                Ok(InsertOutcome::Inserted) => return Ok(PublishOutcome::Posted(posting)),
                Ok(InsertOutcome::Existing(existing)) => {
                    return Ok(PublishOutcome::AlreadyPosted(existing));
                }
                Err(e) => {
                    tracing::warn!(key = %key, attempt, error = %e, "failed to record posting");
                    last_error = Some(e);
                    tokio::time::sleep(backoff_delay(attempt, self.backoff_base_ms)).await;
                }
            }
        }
        let error = PipelineError::AmbiguousPostOutcome {
            reason: format!(
                "posted as {} but not recorded: {}",
                posting.external_post_id,
                last_error.map_or_else(String::new, |e| e.to_string())
            ),
            key: key.clone(),
        };
        Err(self.settle_failure(&key, error).await)
    }
}

#[async_trait]
impl Publish for PosterDispatcher {
    async fn publish(
        &self,
        record: &Record,
        result: &SentimentResult,
        target: TargetPlatform,
    ) -> Result<PublishOutcome, PipelineError> {
        let key = PostingKey::new(record.source, &record.record_id, target);
        let lock = self.locks.get(&key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.storage.get_posting(&key).await? {
            return Ok(PublishOutcome::AlreadyPosted(existing));
        }

        let connector = self
            .connectors
            .get(&target)
            .ok_or_else(|| PipelineError::NoPublisher(target.to_string()))?;

        let text = compose_post(record, result);
        let chars = text.chars().count();
        if chars > target.max_post_chars() {
            return Err(PipelineError::PostRejected {
                key,
                reason: format!("{chars} characters exceeds the {target} limit of {}", target.max_post_chars()),
            });
        }

        let attempt = PostingAttempt::pending(&key, &text, Utc::now());
        if let AttemptStart::Unresolved(earlier) =
            self.storage.begin_posting_attempt(&attempt).await?
        {
            return Err(PipelineError::AmbiguousPostOutcome {
                reason: format!(
                    "{} attempt from {} awaits reconciliation{}",
                    earlier.status,
                    earlier.started_at.to_rfc3339(),
                    earlier
                        .reason
                        .as_deref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                ),
                key,
            });
        }

        let external_post_id = match self.send(connector.as_ref(), &key, &text).await {
            Ok(id) => id,
            Err(e) => return Err(self.settle_failure(&key, e).await),
        };
        tracing::info!(key = %key, external_post_id = %external_post_id, "posted");

        self.record_posting(PostingRecord {
            source: record.source,
            record_id: record.record_id.clone(),
            target_platform: target,
            posted_at: Utc::now(),
            external_post_id,
        })
        .await
    }

    fn supports(&self, target: TargetPlatform) -> bool {
        self.connectors.contains_key(&target)
    }
}

/// Logs what would be posted without touching connectors or storage.
#[derive(Debug, Default)]
pub struct DryRunDispatcher {
    targets: Vec<TargetPlatform>,
}

impl DryRunDispatcher {
    /// `targets` are the platforms treated as available.
    #[must_use]
    pub fn new(targets: Vec<TargetPlatform>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Publish for DryRunDispatcher {
    async fn publish(
        &self,
        record: &Record,
        result: &SentimentResult,
        target: TargetPlatform,
    ) -> Result<PublishOutcome, PipelineError> {
        let key = PostingKey::new(record.source, &record.record_id, target);
        let text = compose_post(record, result);
        tracing::info!(key = %key, text = %text, "DRY-RUN: would post to {target}");
        Ok(PublishOutcome::DryRun { key, text })
    }

    fn supports(&self, target: TargetPlatform) -> bool {
        self.targets.contains(&target)
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
