//! Durable storage capability consumed by the pipeline.
//!
//! The Postgres implementation lives in `pulsecheck-db`; an in-memory one
//! ships with `pulsecheck-pipeline` for tests.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::cursor::Cursor;
use crate::types::{
    PostingAttempt, PostingKey, PostingRecord, Record, SentimentResult, Source, StatusSummary,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("corrupt {what} stored for {key}: {reason}")]
    Corrupt {
        what: &'static str,
        key: String,
        reason: String,
    },
}

/// Result of a unique insert into the posting history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key was already present; carries the stored row.
    Existing(PostingRecord),
}

/// Result of registering a [`PostingAttempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStart {
    Started,
    /// An earlier attempt for the key was never resolved; carries it.
    Unresolved(PostingAttempt),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist fetched records. Records already stored are left unchanged.
    async fn save_records(&self, records: &[Record]) -> Result<(), StorageError>;

    async fn get_cursor(
        &self,
        source: Source,
        stream_id: &str,
    ) -> Result<Option<Cursor>, StorageError>;

    /// Atomically replace the cursor for (`source`, `stream_id`) with `new`
    /// if and only if the stored value equals `expected` (`None` = absent).
    ///
    /// Returns `false` without writing when the stored value differs.
    async fn compare_and_set_cursor(
        &self,
        source: Source,
        stream_id: &str,
        expected: Option<&Cursor>,
        new: &Cursor,
    ) -> Result<bool, StorageError>;

    /// Insert or overwrite sentiment results keyed by (`source`, `record_id`).
    async fn upsert_sentiments(&self, results: &[SentimentResult]) -> Result<(), StorageError>;

    async fn get_sentiment(
        &self,
        source: Source,
        record_id: &str,
    ) -> Result<Option<SentimentResult>, StorageError>;

    async fn get_posting(&self, key: &PostingKey) -> Result<Option<PostingRecord>, StorageError>;

    /// All posting keys that exist for the given records of `source`.
    async fn posted_keys(
        &self,
        source: Source,
        record_ids: &[String],
    ) -> Result<HashSet<PostingKey>, StorageError>;

    /// Insert a posting record, enforcing uniqueness on its [`PostingKey`].
    ///
    /// Any attempt on file for the key is removed in the same write.
    async fn insert_posting(&self, record: &PostingRecord) -> Result<InsertOutcome, StorageError>;

    /// Record the intent to post before the post is sent. Nothing is written
    /// when an attempt for the key already exists.
    async fn begin_posting_attempt(
        &self,
        attempt: &PostingAttempt,
    ) -> Result<AttemptStart, StorageError>;

    async fn mark_posting_ambiguous(
        &self,
        key: &PostingKey,
        reason: &str,
    ) -> Result<(), StorageError>;

    /// Drop the attempt for `key` once it is known nothing was published.
    /// Returns whether an attempt existed.
    async fn clear_posting_attempt(&self, key: &PostingKey) -> Result<bool, StorageError>;

    /// Every unresolved attempt, oldest first.
    async fn list_posting_attempts(&self) -> Result<Vec<PostingAttempt>, StorageError>;

    async fn status_summary(&self, confidence_threshold: f64)
        -> Result<StatusSummary, StorageError>;
}
