use std::collections::HashSet;

use pulsecheck_core::{Cursor, Record};

use crate::connectors::{ConnectorError, PlatformConnector};
use crate::error::PipelineError;
use crate::retry::retry_with_backoff;

/// Pulls unseen records from a connector, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct BatchFetcher {
    max_retries: u32,
    backoff_base_ms: u64,
}

impl BatchFetcher {
    #[must_use]
    pub fn new(max_retries: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
        }
    }

    /// Records of `stream_id` strictly after `cursor`, oldest first, at most
    /// `max_count`. Calling it twice with the same cursor yields the same
    /// set, provided the platform has nothing new.
    ///
    /// Anything the connector returns at or before the cursor, with a
    /// non-numeric id on a watermark stream, or duplicated within the batch
    /// is dropped with a warning.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StreamGone`] when the stream is gone or credentials
    /// were revoked (never retried); [`PipelineError::FetchUnavailable`]
    /// once transient failures exhaust the retry budget, or at once when
    /// the unseen backlog is deeper than the connector can page through.
    pub async fn fetch(
        &self,
        connector: &dyn PlatformConnector,
        stream_id: &str,
        cursor: Option<&Cursor>,
        max_count: usize,
    ) -> Result<Vec<Record>, PipelineError> {
        let source = connector.source();
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let fetched = retry_with_backoff("fetch", self.max_retries, self.backoff_base_ms, || {
            connector.list_new(stream_id, cursor, max_count)
        })
        .await
        .map_err(|e| match e {
            ConnectorError::StreamGone(reason) | ConnectorError::Unauthorized(reason) => {
                PipelineError::StreamGone {
                    platform: source,
                    stream_id: stream_id.to_owned(),
                    reason,
                }
            }
            other => PipelineError::FetchUnavailable {
                platform: source,
                stream_id: stream_id.to_owned(),
                reason: other.to_string(),
            },
        })?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut records: Vec<Record> = Vec::with_capacity(fetched.len());
        for record in fetched {
            if record.source != source || record.stream_id != stream_id {
                tracing::warn!(
                    source = %source,
                    stream_id,
                    record_id = %record.record_id,
                    "dropping record from a different stream"
                );
                continue;
            }
            if source.has_monotonic_ids() && record.numeric_id().is_none() {
                tracing::warn!(
                    source = %source,
                    stream_id,
                    record_id = %record.record_id,
                    "dropping record with malformed id"
                );
                continue;
            }
            if cursor.is_some_and(|c| c.covers(&record.record_id)) {
                tracing::warn!(
                    source = %source,
                    stream_id,
                    record_id = %record.record_id,
                    "dropping record at or before the cursor"
                );
                continue;
            }
            if !seen.insert(record.record_id.clone()) {
                continue;
            }
            records.push(record);
        }

        if source.has_monotonic_ids() {
            records.sort_by_key(|r| r.numeric_id().unwrap_or(u64::MAX));
        }
        records.truncate(max_count);

        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            tracing::info!(
                source = %source,
                stream_id,
                count = records.len(),
                first_id = %first.record_id,
                last_id = %last.record_id,
                "fetched records"
            );
        }
        Ok(records)
    }
}
