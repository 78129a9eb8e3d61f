//! Scripted collaborators shared by the pipeline integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pulsecheck_core::{Cursor, Label, Record, Source, Storage, TargetPlatform};
use pulsecheck_pipeline::{
    BatchFetcher, Classification, Classifier, ClassifierError, ConnectorError, CursorStore,
    Pipeline, PipelineSettings, PlatformConnector, PostingConnector, Publish, SentimentScorer,
};

pub fn record(source: Source, stream_id: &str, id: &str, text: &str) -> Record {
    Record {
        source,
        stream_id: stream_id.to_string(),
        record_id: id.to_string(),
        text: text.to_string(),
        created_at: Utc::now() - Duration::minutes(10),
        author: "someone".to_string(),
    }
}

/// Platform that serves a fixed set of records, honouring the cursor the way
/// a real API does.
pub struct ScriptedSource {
    source: Source,
    streams: Vec<String>,
    records: Mutex<Vec<Record>>,
    failures: Mutex<VecDeque<ConnectorError>>,
    pub calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(source: Source, streams: &[&str], records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            source,
            streams: streams.iter().map(|s| (*s).to_string()).collect(),
            records: Mutex::new(records),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn push_record(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    /// Errors returned, in order, before any records are served.
    pub fn fail_with(&self, errors: Vec<ConnectorError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformConnector for ScriptedSource {
    fn source(&self) -> Source {
        self.source
    }

    fn streams(&self) -> Vec<String> {
        self.streams.clone()
    }

    async fn list_new(
        &self,
        stream_id: &str,
        since: Option<&Cursor>,
        max_count: usize,
    ) -> Result<Vec<Record>, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut out: Vec<Record> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.stream_id == stream_id)
            .filter(|r| since.is_none_or(|c| !c.covers(&r.record_id)))
            .cloned()
            .collect();
        if self.source.has_monotonic_ids() {
            out.sort_by_key(|r| r.numeric_id());
        }
        out.truncate(max_count);
        Ok(out)
    }
}

/// Posting target that remembers what it published.
pub struct ScriptedPoster {
    target: TargetPlatform,
    pub posted: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<ConnectorError>>,
    lookup_failures: Mutex<VecDeque<ConnectorError>>,
}

impl ScriptedPoster {
    pub fn new(target: TargetPlatform) -> Arc<Self> {
        Arc::new(Self {
            target,
            posted: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            lookup_failures: Mutex::new(VecDeque::new()),
        })
    }

    pub fn fail_with(&self, errors: Vec<ConnectorError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// Errors returned, in order, by `find_post` before it answers.
    pub fn fail_lookups_with(&self, errors: Vec<ConnectorError>) {
        self.lookup_failures.lock().unwrap().extend(errors);
    }

    pub fn posts(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostingConnector for ScriptedPoster {
    fn target(&self) -> TargetPlatform {
        self.target
    }

    async fn post(&self, text: &str) -> Result<String, ConnectorError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut posted = self.posted.lock().unwrap();
        posted.push(text.to_string());
        Ok(format!("{}-{}", self.target, posted.len()))
    }

    async fn find_post(&self, text: &str) -> Result<Option<String>, ConnectorError> {
        if let Some(err) = self.lookup_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let posted = self.posted.lock().unwrap();
        Ok(posted
            .iter()
            .position(|p| p == text)
            .map(|i| format!("{}-{}", self.target, i + 1)))
    }
}

/// Texts containing "great" are positive; a trailing number sets the
/// confidence (default 0.95). Everything else is negative at 0.9.
pub struct KeywordClassifier {
    pub batches: Mutex<Vec<usize>>,
    pub calls: AtomicUsize,
}

impl KeywordClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn classify(text: &str) -> Classification {
        if text.contains("great") {
            let confidence = text
                .split_whitespace()
                .last()
                .and_then(|w| w.parse::<f64>().ok())
                .unwrap_or(0.95);
            Classification {
                label: Label::Positive,
                confidence,
            }
        } else {
            Classification {
                label: Label::Negative,
                confidence: 0.9,
            }
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify_batch(
        &self,
        texts: &[&str],
    ) -> Result<Vec<Classification>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| Self::classify(t)).collect())
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

pub fn settings(post_cap: usize, fetch_batch_size: usize) -> PipelineSettings {
    PipelineSettings {
        confidence_threshold: 0.7,
        max_age: Duration::days(7),
        post_cap,
        fetch_batch_size,
        targets: None,
        recent_window: 500,
    }
}

/// A pipeline with zero back-off so retries do not slow the tests.
pub fn pipeline(
    storage: Arc<dyn Storage>,
    cursors: CursorStore,
    classifier: Arc<dyn Classifier>,
    publisher: Arc<dyn Publish>,
    settings: PipelineSettings,
) -> Pipeline {
    Pipeline::new(
        storage,
        cursors,
        BatchFetcher::new(2, 0),
        SentimentScorer::new(classifier, 32, 2, 0),
        publisher,
        settings,
    )
}
