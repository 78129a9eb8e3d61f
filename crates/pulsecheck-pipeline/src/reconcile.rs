//! Settling posting attempts that an ambiguous outcome or a crash left
//! behind. Until an attempt is settled its key is never posted again.

use std::collections::HashMap;
use std::sync::Arc;

use pulsecheck_core::{
    InsertOutcome, PostingAttempt, PostingKey, PostingRecord, Storage, TargetPlatform,
};

use crate::connectors::PostingConnector;
use crate::error::PipelineError;

/// What an operator knows about an unresolved attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The post exists on the target with this id.
    PostedAs(String),
    /// The post does not exist; the key may be published again.
    NotPosted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Recorded(PostingRecord),
    Cleared,
    /// Still undecided, with the reason.
    Unresolved(String),
}

pub struct Reconciler {
    storage: Arc<dyn Storage>,
    connectors: HashMap<TargetPlatform, Arc<dyn PostingConnector>>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        connectors: HashMap<TargetPlatform, Arc<dyn PostingConnector>>,
    ) -> Self {
        Self {
            storage,
            connectors,
        }
    }

    /// Every attempt awaiting reconciliation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if the attempts cannot be read.
    pub async fn pending(&self) -> Result<Vec<PostingAttempt>, PipelineError> {
        Ok(self.storage.list_posting_attempts().await?)
    }

    /// Look each attempt up on its target and record the ones that exist.
    ///
    /// A post that cannot be found is left unresolved: the lookup only
    /// covers recent posts, so absence is not proof. Those need
    /// [`Reconciler::resolve`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Storage`] if storage fails. Lookup failures
    /// are reported per attempt instead.
    pub async fn check_all(
        &self,
    ) -> Result<Vec<(PostingAttempt, ReconcileOutcome)>, PipelineError> {
        let mut outcomes = Vec::new();
        for attempt in self.pending().await? {
            let key = attempt.key();
            let Some(connector) = self.connectors.get(&attempt.target_platform) else {
                let reason = format!("no posting connector configured for {}", key.target);
                outcomes.push((attempt, ReconcileOutcome::Unresolved(reason)));
                continue;
            };

            let outcome = match connector.find_post(&attempt.text).await {
                Ok(Some(external_post_id)) => {
                    tracing::info!(key = %key, external_post_id = %external_post_id, "found unrecorded post");
                    self.record(&attempt, external_post_id).await?
                }
                Ok(None) => ReconcileOutcome::Unresolved(
                    "not found among recent posts; resolve manually".to_string(),
                ),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "lookup failed");
                    ReconcileOutcome::Unresolved(format!("lookup failed: {e}"))
                }
            };
            outcomes.push((attempt, outcome));
        }
        Ok(outcomes)
    }

    /// Settle the attempt for `key` with what the operator found out.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoAttempt`] if nothing is on file for `key`,
    /// or [`PipelineError::Storage`] if storage fails.
    pub async fn resolve(
        &self,
        key: &PostingKey,
        resolution: Resolution,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let attempt = self
            .pending()
            .await?
            .into_iter()
            .find(|a| a.key() == *key)
            .ok_or_else(|| PipelineError::NoAttempt(key.clone()))?;

        match resolution {
            Resolution::PostedAs(external_post_id) => self.record(&attempt, external_post_id).await,
            Resolution::NotPosted => {
                self.storage.clear_posting_attempt(key).await?;
                tracing::info!(key = %key, "attempt cleared, key may be posted again");
                Ok(ReconcileOutcome::Cleared)
            }
        }
    }

    async fn record(
        &self,
        attempt: &PostingAttempt,
        external_post_id: String,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let posting = PostingRecord {
            source: attempt.source,
            record_id: attempt.record_id.clone(),
            target_platform: attempt.target_platform,
            posted_at: attempt.started_at,
            external_post_id,
        };
        match self.storage.insert_posting(&posting).await? {
            InsertOutcome::Inserted => Ok(ReconcileOutcome::Recorded(posting)),
            InsertOutcome::Existing(existing) => Ok(ReconcileOutcome::Recorded(existing)),
        }
    }
}
