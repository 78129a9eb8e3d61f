use std::collections::HashSet;

use async_trait::async_trait;
use pulsecheck_core::{
    AttemptStart, Cursor, InsertOutcome, PostingAttempt, PostingKey, PostingRecord, Record,
    SentimentResult, Source, StatusSummary, Storage, StorageError,
};
use sqlx::PgPool;

use crate::{attempts, cursors, postings, records, sentiment};

/// Postgres-backed [`Storage`].
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn save_records(&self, batch: &[Record]) -> Result<(), StorageError> {
        records::upsert_records(&self.pool, batch).await?;
        Ok(())
    }

    async fn get_cursor(
        &self,
        source: Source,
        stream_id: &str,
    ) -> Result<Option<Cursor>, StorageError> {
        Ok(cursors::get_cursor(&self.pool, source, stream_id).await?)
    }

    async fn compare_and_set_cursor(
        &self,
        source: Source,
        stream_id: &str,
        expected: Option<&Cursor>,
        new: &Cursor,
    ) -> Result<bool, StorageError> {
        Ok(cursors::compare_and_set_cursor(&self.pool, source, stream_id, expected, new).await?)
    }

    async fn upsert_sentiments(&self, results: &[SentimentResult]) -> Result<(), StorageError> {
        Ok(sentiment::upsert_sentiment_results(&self.pool, results).await?)
    }

    async fn get_sentiment(
        &self,
        source: Source,
        record_id: &str,
    ) -> Result<Option<SentimentResult>, StorageError> {
        Ok(sentiment::get_sentiment_result(&self.pool, source, record_id).await?)
    }

    async fn get_posting(&self, key: &PostingKey) -> Result<Option<PostingRecord>, StorageError> {
        Ok(postings::get_posting_record(&self.pool, key).await?)
    }

    async fn posted_keys(
        &self,
        source: Source,
        record_ids: &[String],
    ) -> Result<HashSet<PostingKey>, StorageError> {
        Ok(postings::list_posting_keys(&self.pool, source, record_ids).await?)
    }

    async fn insert_posting(&self, record: &PostingRecord) -> Result<InsertOutcome, StorageError> {
        Ok(postings::insert_posting_record(&self.pool, record).await?)
    }

    async fn begin_posting_attempt(
        &self,
        attempt: &PostingAttempt,
    ) -> Result<AttemptStart, StorageError> {
        Ok(attempts::insert_posting_attempt(&self.pool, attempt).await?)
    }

    async fn mark_posting_ambiguous(
        &self,
        key: &PostingKey,
        reason: &str,
    ) -> Result<(), StorageError> {
        Ok(attempts::mark_attempt_ambiguous(&self.pool, key, reason).await?)
    }

    async fn clear_posting_attempt(&self, key: &PostingKey) -> Result<bool, StorageError> {
        Ok(attempts::delete_posting_attempt(&self.pool, key).await?)
    }

    async fn list_posting_attempts(&self) -> Result<Vec<PostingAttempt>, StorageError> {
        Ok(attempts::list_posting_attempts(&self.pool).await?)
    }

    async fn status_summary(
        &self,
        confidence_threshold: f64,
    ) -> Result<StatusSummary, StorageError> {
        let total_records = records::count_records(&self.pool).await?;
        let by_label = sentiment::label_distribution(&self.pool).await?;
        let high_confidence_positive =
            sentiment::count_high_confidence_positive(&self.pool, confidence_threshold).await?;
        let posts_by_target = postings::posts_by_target(&self.pool).await?;
        let unresolved_attempts = attempts::count_posting_attempts(&self.pool).await?;

        Ok(StatusSummary {
            total_records,
            total_scored: by_label.iter().map(|(_, n)| n).sum(),
            by_label,
            high_confidence_positive,
            posts_by_target,
            unresolved_attempts,
        })
    }
}
