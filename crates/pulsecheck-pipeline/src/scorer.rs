//! Batched sentiment scoring with topic extraction.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use pulsecheck_core::{Record, SentimentResult};
use regex::Regex;

use crate::classifier::{Classification, Classifier, ClassifierError};
use crate::error::PipelineError;
use crate::retry::retry_with_backoff;

const MAX_TOPICS: usize = 5;

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9_]+)").expect("valid regex"));
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z']{3,}").expect("valid regex"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[\w.\-]+").expect("valid regex"));

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "doing",
    "from", "have", "having", "here", "just", "like", "more", "most", "much", "only", "other",
    "over", "really", "same", "should", "some", "such", "than", "that", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "very", "want", "were", "what", "when",
    "where", "which", "while", "will", "with", "would", "your", "yours",
];

/// Deterministic keyword extraction: hashtags first (in order of
/// appearance), then the most frequent non-stopword words of four or more
/// letters (ties by first appearance), at most five in total.
#[must_use]
pub fn extract_topics(text: &str) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();

    for cap in HASHTAG_RE.captures_iter(text) {
        let tag = format!("#{}", cap[1].to_lowercase());
        if !topics.contains(&tag) {
            topics.push(tag);
        }
        if topics.len() == MAX_TOPICS {
            return topics;
        }
    }

    let stripped = URL_RE.replace_all(text, " ");
    let stripped = MENTION_RE.replace_all(&stripped, " ");
    let stripped = HASHTAG_RE.replace_all(&stripped, " ");

    // word -> (count, first position)
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, m) in WORD_RE.find_iter(&stripped).enumerate() {
        let word = m.as_str().trim_end_matches('\'').to_lowercase();
        if word.chars().filter(char::is_ascii_alphabetic).count() < 4
            || STOPWORDS.contains(&word.as_str())
        {
            continue;
        }
        counts.entry(word).or_insert((0, pos)).0 += 1;
    }

    let mut words: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    for (word, _, _) in words {
        if topics.len() == MAX_TOPICS {
            break;
        }
        topics.push(word);
    }
    topics
}

/// Outcome for one input text.
#[derive(Debug, Clone, PartialEq)]
pub enum TextScore {
    Scored(Classification),
    /// The classifier refuses this text; retrying will not change that.
    Unscorable(String),
}

/// Scores for one batch of records.
#[derive(Debug, Default, PartialEq)]
pub struct ScoredBatch {
    /// Results in record order, for the records that could be scored.
    pub results: Vec<SentimentResult>,
    /// `(record_id, reason)` for records the classifier refused.
    pub unscorable: Vec<(String, String)>,
}

/// Wraps a [`Classifier`] and turns records into [`SentimentResult`]s.
pub struct SentimentScorer {
    classifier: Arc<dyn Classifier>,
    max_batch_size: usize,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl SentimentScorer {
    #[must_use]
    pub fn new(
        classifier: Arc<dyn Classifier>,
        max_batch_size: usize,
        max_retries: u32,
        backoff_base_ms: u64,
    ) -> Self {
        Self {
            classifier,
            max_batch_size: max_batch_size.max(1),
            max_retries,
            backoff_base_ms,
        }
    }

    async fn classify(&self, texts: &[&str]) -> Result<Vec<Classification>, ClassifierError> {
        let classified = retry_with_backoff(
            "classify",
            self.max_retries,
            self.backoff_base_ms,
            || self.classifier.classify_batch(texts),
        )
        .await?;
        if classified.len() != texts.len() {
            return Err(ClassifierError::Malformed(format!(
                "{} returned {} results for {} inputs",
                self.classifier.name(),
                classified.len(),
                texts.len()
            )));
        }
        Ok(classified)
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::ScoringUnavailable(format!("{}: {reason}", self.classifier.name()))
    }

    /// Classify `texts` one-to-one and in order, in chunks of at most
    /// `max_batch_size`. Each chunk is retried as a whole on transient
    /// classifier errors.
    ///
    /// Blank texts are never sent. A chunk the classifier refuses is split
    /// in half until the refused texts are isolated; those come back as
    /// [`TextScore::Unscorable`] and the rest are scored normally.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ScoringUnavailable`] when transient failures
    /// outlast the retry budget, when the classifier fails for reasons
    /// unrelated to the inputs, or when it refuses every input of a batch.
    /// No partial output is returned.
    pub async fn score_texts(&self, texts: &[&str]) -> Result<Vec<TextScore>, PipelineError> {
        let mut out: Vec<Option<TextScore>> = vec![None; texts.len()];
        let mut pending: Vec<usize> = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                out[i] = Some(TextScore::Unscorable("empty text".to_string()));
            } else {
                pending.push(i);
            }
        }

        let mut refused = 0usize;
        let mut work: Vec<&[usize]> = pending.chunks(self.max_batch_size).rev().collect();
        while let Some(chunk) = work.pop() {
            let inputs: Vec<&str> = chunk.iter().map(|&i| texts[i]).collect();
            match self.classify(&inputs).await {
                Ok(classified) => {
                    for (&i, c) in chunk.iter().zip(classified) {
                        out[i] = Some(TextScore::Scored(Classification {
                            label: c.label,
                            confidence: c.confidence.clamp(0.0, 1.0),
                        }));
                    }
                }
                Err(e) if e.is_input_rejection() && chunk.len() > 1 => {
                    tracing::warn!(
                        classifier = self.classifier.name(),
                        size = chunk.len(),
                        error = %e,
                        "classifier refused a chunk, splitting it"
                    );
                    let (left, right) = chunk.split_at(chunk.len() / 2);
                    work.push(right);
                    work.push(left);
                }
                Err(e) if e.is_input_rejection() => {
                    out[chunk[0]] = Some(TextScore::Unscorable(e.to_string()));
                    refused += 1;
                }
                Err(e) => return Err(self.unavailable(e)),
            }
        }

        // Every input refused points at the classifier, not the inputs.
        if pending.len() > 1 && refused == pending.len() {
            return Err(self.unavailable("refused every input of the batch"));
        }

        Ok(out
            .into_iter()
            .map(|score| score.unwrap_or_else(|| TextScore::Unscorable("not scored".to_string())))
            .collect())
    }

    /// Score records into sentiment results, preserving order.
    ///
    /// # Errors
    ///
    /// See [`SentimentScorer::score_texts`].
    pub async fn score(&self, records: &[Record]) -> Result<ScoredBatch, PipelineError> {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let scores = self.score_texts(&texts).await?;

        let mut batch = ScoredBatch::default();
        for (record, score) in records.iter().zip(scores) {
            match score {
                TextScore::Scored(c) => batch.results.push(SentimentResult {
                    source: record.source,
                    record_id: record.record_id.clone(),
                    label: c.label,
                    confidence: c.confidence,
                    topics: extract_topics(&record.text),
                }),
                TextScore::Unscorable(reason) => {
                    batch.unscorable.push((record.record_id.clone(), reason));
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LexiconClassifier;
    use async_trait::async_trait;
    use pulsecheck_core::Label;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn hashtags_come_first_and_are_deduplicated() {
        let topics = extract_topics("Shipping #Rust today, #rust is #fast and shipping rocks");
        assert_eq!(topics[0], "#rust");
        assert_eq!(topics[1], "#fast");
        assert_eq!(topics[2], "shipping");
    }

    #[test]
    fn frequent_words_outrank_rare_ones() {
        let topics = extract_topics("release notes: the release fixes crashes, release soon");
        assert_eq!(topics[0], "release");
        assert!(topics.contains(&"notes".to_string()));
    }

    #[test]
    fn stopwords_urls_and_short_words_are_skipped() {
        let topics = extract_topics("this is what we want https://example.com/path @someone.bsky.social ok");
        assert!(topics.is_empty(), "got {topics:?}");
    }

    #[test]
    fn topics_are_capped_at_five() {
        let topics = extract_topics("alpha bravo charlie delta echoes foxtrot golfing hotel");
        assert_eq!(topics.len(), MAX_TOPICS);
        assert_eq!(topics[0], "alpha");
    }

    struct FlakyClassifier {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Classifier for FlakyClassifier {
        async fn classify_batch(
            &self,
            texts: &[&str],
        ) -> Result<Vec<Classification>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ClassifierError::ModelLoading {
                    estimated_secs: 0.0,
                });
            }
            Ok(texts
                .iter()
                .map(|_| Classification {
                    label: Label::Positive,
                    confidence: 1.7,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn transient_failure_retries_whole_chunk_and_clamps() {
        let classifier = Arc::new(FlakyClassifier {
            failures_left: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let scorer = SentimentScorer::new(classifier.clone(), 10, 3, 0);

        let out = scorer.score_texts(&["a", "b"]).await.unwrap();

        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], TextScore::Scored(c) if (c.confidence - 1.0).abs() < f64::EPSILON));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_is_scoring_unavailable() {
        let classifier = Arc::new(FlakyClassifier {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let scorer = SentimentScorer::new(classifier.clone(), 10, 2, 0);

        let err = scorer.score_texts(&["a"]).await.unwrap_err();

        assert!(matches!(err, PipelineError::ScoringUnavailable(_)));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn chunking_does_not_change_results() {
        let texts = ["great day", "awful bug", "nothing here", "love this", "worst ever"];
        let whole = SentimentScorer::new(Arc::new(LexiconClassifier), 100, 0, 0)
            .score_texts(&texts)
            .await
            .unwrap();
        let chunked = SentimentScorer::new(Arc::new(LexiconClassifier), 2, 0, 0)
            .score_texts(&texts)
            .await
            .unwrap();
        assert_eq!(whole, chunked);
    }

    /// Answers 400 for any batch containing "poison", like an inference
    /// API refusing one input.
    struct PickyClassifier {
        status: u16,
        batches: std::sync::Mutex<Vec<usize>>,
    }

    impl PickyClassifier {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                batches: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Classifier for PickyClassifier {
        async fn classify_batch(
            &self,
            texts: &[&str],
        ) -> Result<Vec<Classification>, ClassifierError> {
            self.batches.lock().unwrap().push(texts.len());
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(ClassifierError::Status {
                    status: self.status,
                    body: "refused".to_string(),
                });
            }
            Ok(texts
                .iter()
                .map(|_| Classification {
                    label: Label::Positive,
                    confidence: 0.9,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "picky"
        }
    }

    #[tokio::test]
    async fn blank_texts_are_never_sent() {
        let classifier = PickyClassifier::new(400);
        let scorer = SentimentScorer::new(classifier.clone(), 10, 0, 0);

        let out = scorer.score_texts(&["good", "  ", "", "fine"]).await.unwrap();

        assert!(matches!(out[0], TextScore::Scored(_)));
        assert!(matches!(out[1], TextScore::Unscorable(_)));
        assert!(matches!(out[2], TextScore::Unscorable(_)));
        assert!(matches!(out[3], TextScore::Scored(_)));
        assert_eq!(*classifier.batches.lock().unwrap(), [2]);
    }

    #[tokio::test]
    async fn refused_text_is_isolated_and_the_rest_scored() {
        let classifier = PickyClassifier::new(400);
        let scorer = SentimentScorer::new(classifier.clone(), 10, 3, 0);

        let out = scorer
            .score_texts(&["one", "two", "poison pill", "four"])
            .await
            .unwrap();

        assert!(matches!(out[0], TextScore::Scored(_)));
        assert!(matches!(out[1], TextScore::Scored(_)));
        assert!(matches!(out[2], TextScore::Unscorable(ref r) if r.contains("400")));
        assert!(matches!(out[3], TextScore::Scored(_)));
        // Refusals are not retried: 4, then halves 2 + 2, then 1 + 1.
        assert_eq!(*classifier.batches.lock().unwrap(), [4, 2, 2, 1, 1]);
    }

    #[tokio::test]
    async fn refusing_everything_is_scoring_unavailable() {
        let scorer = SentimentScorer::new(PickyClassifier::new(400), 10, 0, 0);

        let err = scorer.score_texts(&["poison a", "poison b"]).await.unwrap_err();

        assert!(matches!(err, PipelineError::ScoringUnavailable(_)));
    }

    #[tokio::test]
    async fn auth_failure_is_not_blamed_on_inputs() {
        let classifier = PickyClassifier::new(401);
        let scorer = SentimentScorer::new(classifier.clone(), 10, 0, 0);

        let err = scorer.score_texts(&["a", "poison"]).await.unwrap_err();

        assert!(matches!(err, PipelineError::ScoringUnavailable(_)));
        assert_eq!(*classifier.batches.lock().unwrap(), [2]);
    }
}
