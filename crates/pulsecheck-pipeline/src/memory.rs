//! In-process [`Storage`] for tests and local experiments.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pulsecheck_core::{
    AttemptStart, AttemptStatus, Cursor, InsertOutcome, Label, PostingAttempt, PostingKey,
    PostingRecord, Record, SentimentResult, Source, StatusSummary, Storage, StorageError,
};

#[derive(Default)]
struct Inner {
    records: HashMap<(Source, String), Record>,
    cursors: HashMap<(Source, String), Cursor>,
    sentiments: HashMap<(Source, String), SentimentResult>,
    postings: HashMap<PostingKey, PostingRecord>,
    attempts: HashMap<PostingKey, PostingAttempt>,
}

/// Mutex-guarded maps with the same uniqueness and compare-and-set rules as
/// the Postgres schema.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every stored posting record, ordered by key.
    #[must_use]
    pub fn postings(&self) -> Vec<PostingRecord> {
        let inner = self.lock();
        let mut all: Vec<PostingRecord> = inner.postings.values().cloned().collect();
        all.sort_by_key(PostingRecord::key);
        all
    }

    /// Unresolved posting attempts, ordered by key.
    #[must_use]
    pub fn attempts(&self) -> Vec<PostingAttempt> {
        let inner = self.lock();
        let mut all: Vec<PostingAttempt> = inner.attempts.values().cloned().collect();
        all.sort_by_key(PostingAttempt::key);
        all
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn record(&self, source: Source, record_id: &str) -> Option<Record> {
        self.lock()
            .records
            .get(&(source, record_id.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_records(&self, records: &[Record]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        for record in records {
            inner
                .records
                .entry((record.source, record.record_id.clone()))
                .or_insert_with(|| record.clone());
        }
        Ok(())
    }

    async fn get_cursor(
        &self,
        source: Source,
        stream_id: &str,
    ) -> Result<Option<Cursor>, StorageError> {
        Ok(self
            .lock()
            .cursors
            .get(&(source, stream_id.to_owned()))
            .cloned())
    }

    async fn compare_and_set_cursor(
        &self,
        source: Source,
        stream_id: &str,
        expected: Option<&Cursor>,
        new: &Cursor,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let key = (source, stream_id.to_owned());
        if inner.cursors.get(&key) != expected {
            return Ok(false);
        }
        inner.cursors.insert(key, new.clone());
        Ok(true)
    }

    async fn upsert_sentiments(&self, results: &[SentimentResult]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        for result in results {
            inner
                .sentiments
                .insert((result.source, result.record_id.clone()), result.clone());
        }
        Ok(())
    }

    async fn get_sentiment(
        &self,
        source: Source,
        record_id: &str,
    ) -> Result<Option<SentimentResult>, StorageError> {
        Ok(self
            .lock()
            .sentiments
            .get(&(source, record_id.to_owned()))
            .cloned())
    }

    async fn get_posting(&self, key: &PostingKey) -> Result<Option<PostingRecord>, StorageError> {
        Ok(self.lock().postings.get(key).cloned())
    }

    async fn posted_keys(
        &self,
        source: Source,
        record_ids: &[String],
    ) -> Result<HashSet<PostingKey>, StorageError> {
        let wanted: HashSet<&str> = record_ids.iter().map(String::as_str).collect();
        Ok(self
            .lock()
            .postings
            .keys()
            .filter(|k| k.source == source && wanted.contains(k.record_id.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_posting(&self, record: &PostingRecord) -> Result<InsertOutcome, StorageError> {
        let mut inner = self.lock();
        let key = record.key();
        if let Some(existing) = inner.postings.get(&key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner.attempts.remove(&key);
        inner.postings.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn begin_posting_attempt(
        &self,
        attempt: &PostingAttempt,
    ) -> Result<AttemptStart, StorageError> {
        let mut inner = self.lock();
        let key = attempt.key();
        if let Some(existing) = inner.attempts.get(&key) {
            return Ok(AttemptStart::Unresolved(existing.clone()));
        }
        inner.attempts.insert(key, attempt.clone());
        Ok(AttemptStart::Started)
    }

    async fn mark_posting_ambiguous(
        &self,
        key: &PostingKey,
        reason: &str,
    ) -> Result<(), StorageError> {
        if let Some(attempt) = self.lock().attempts.get_mut(key) {
            attempt.status = AttemptStatus::Ambiguous;
            attempt.reason = Some(reason.to_owned());
        }
        Ok(())
    }

    async fn clear_posting_attempt(&self, key: &PostingKey) -> Result<bool, StorageError> {
        Ok(self.lock().attempts.remove(key).is_some())
    }

    async fn list_posting_attempts(&self) -> Result<Vec<PostingAttempt>, StorageError> {
        let mut all: Vec<PostingAttempt> = self.lock().attempts.values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.key().cmp(&b.key())));
        Ok(all)
    }

    async fn status_summary(
        &self,
        confidence_threshold: f64,
    ) -> Result<StatusSummary, StorageError> {
        let inner = self.lock();

        let mut by_label: BTreeMap<String, i64> = BTreeMap::new();
        let mut high_confidence_positive = 0;
        for result in inner.sentiments.values() {
            *by_label.entry(result.label.to_string()).or_default() += 1;
            if result.label == Label::Positive && result.confidence >= confidence_threshold {
                high_confidence_positive += 1;
            }
        }

        let mut posts_by_target: BTreeMap<String, i64> = BTreeMap::new();
        for key in inner.postings.keys() {
            *posts_by_target.entry(key.target.to_string()).or_default() += 1;
        }

        Ok(StatusSummary {
            total_records: i64::try_from(inner.records.len()).unwrap_or(i64::MAX),
            total_scored: i64::try_from(inner.sentiments.len()).unwrap_or(i64::MAX),
            by_label: by_label.into_iter().collect(),
            high_confidence_positive,
            posts_by_target: posts_by_target.into_iter().collect(),
            unresolved_attempts: i64::try_from(inner.attempts.len()).unwrap_or(i64::MAX),
        })
    }
}
