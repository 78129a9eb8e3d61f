//! Domain types shared by the pipeline, storage and CLI crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A platform records are ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Discord,
    Bluesky,
    X,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Discord, Source::Bluesky, Source::X];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Discord => "discord",
            Source::Bluesky => "bluesky",
            Source::X => "x",
        }
    }

    /// Default publication targets for findings from this source.
    ///
    /// Discord has no posting target of its own, so its findings go to X.
    #[must_use]
    pub fn default_targets(self) -> &'static [TargetPlatform] {
        match self {
            Source::Discord => &[TargetPlatform::X],
            Source::Bluesky | Source::X => &[TargetPlatform::Bluesky],
        }
    }

    /// Whether this source's stream ids are monotonic (watermark cursor) or
    /// need a recent-id window.
    #[must_use]
    pub fn has_monotonic_ids(self) -> bool {
        matches!(self, Source::Discord | Source::X)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discord" => Ok(Source::Discord),
            "bluesky" | "bsky" => Ok(Source::Bluesky),
            "x" | "twitter" => Ok(Source::X),
            other => Err(CoreError::UnknownPlatform(other.to_string())),
        }
    }
}

/// A platform findings can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Bluesky,
    X,
}

impl TargetPlatform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TargetPlatform::Bluesky => "bluesky",
            TargetPlatform::X => "x",
        }
    }

    /// Maximum post length in characters accepted by the platform.
    #[must_use]
    pub fn max_post_chars(self) -> usize {
        match self {
            TargetPlatform::Bluesky => 300,
            TargetPlatform::X => 280,
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetPlatform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bluesky" | "bsky" => Ok(TargetPlatform::Bluesky),
            "x" | "twitter" => Ok(TargetPlatform::X),
            other => Err(CoreError::UnknownPlatform(other.to_string())),
        }
    }
}

/// One ingested message or post. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub source: Source,
    /// Channel, feed or mention-stream identifier.
    pub stream_id: String,
    /// Source-native unique id.
    pub record_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author: String,
}

impl Record {
    /// Numeric form of `record_id` for sources with monotonic ids.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.record_id.parse::<u64>().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Positive,
    Negative,
}

impl Label {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Positive => "POSITIVE",
            Label::Negative => "NEGATIVE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" | "POS" | "LABEL_1" => Ok(Label::Positive),
            "NEGATIVE" | "NEG" | "LABEL_0" => Ok(Label::Negative),
            other => Err(CoreError::UnknownLabel(other.to_string())),
        }
    }
}

/// Sentiment derived from a [`Record`]. At most one per (`source`, `record_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub source: Source,
    pub record_id: String,
    pub label: Label,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Extracted keywords, possibly empty.
    pub topics: Vec<String>,
}

/// Dedup key enforcing at most one post per record per target platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostingKey {
    pub source: Source,
    pub record_id: String,
    pub target: TargetPlatform,
}

impl PostingKey {
    #[must_use]
    pub fn new(source: Source, record_id: &str, target: TargetPlatform) -> Self {
        Self {
            source,
            record_id: record_id.to_string(),
            target,
        }
    }
}

impl fmt::Display for PostingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.source, self.record_id, self.target)
    }
}

/// Durable proof that a record was published to a target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecord {
    pub source: Source,
    pub record_id: String,
    pub target_platform: TargetPlatform,
    pub posted_at: DateTime<Utc>,
    pub external_post_id: String,
}

impl PostingRecord {
    #[must_use]
    pub fn key(&self) -> PostingKey {
        PostingKey::new(self.source, &self.record_id, self.target_platform)
    }
}

/// Where an unfinished publication stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// The post was sent; no outcome has been written since.
    Pending,
    /// The platform's answer left it unknown whether the post exists.
    Ambiguous,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "ambiguous" => Ok(AttemptStatus::Ambiguous),
            other => Err(CoreError::UnknownAttemptStatus(other.to_string())),
        }
    }
}

/// Intent to publish, written before the post is sent and removed once the
/// outcome is recorded. A key with an attempt on file is never posted again
/// until the attempt is reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingAttempt {
    pub source: Source,
    pub record_id: String,
    pub target_platform: TargetPlatform,
    /// Exact text sent, used to look the post up on the platform.
    pub text: String,
    pub status: AttemptStatus,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl PostingAttempt {
    #[must_use]
    pub fn pending(key: &PostingKey, text: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            source: key.source,
            record_id: key.record_id.clone(),
            target_platform: key.target,
            text: text.to_owned(),
            status: AttemptStatus::Pending,
            reason: None,
            started_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> PostingKey {
        PostingKey::new(self.source, &self.record_id, self.target_platform)
    }
}

/// Aggregate counts for the `status` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSummary {
    pub total_records: i64,
    pub total_scored: i64,
    /// `(label, count)` pairs.
    pub by_label: Vec<(String, i64)>,
    /// Positive results at or above the configured threshold.
    pub high_confidence_positive: i64,
    /// `(target_platform, count)` pairs.
    pub posts_by_target: Vec<(String, i64)>,
    /// Publications waiting for reconciliation.
    pub unresolved_attempts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parses_aliases() {
        assert_eq!("Discord".parse::<Source>().unwrap(), Source::Discord);
        assert_eq!("bsky".parse::<Source>().unwrap(), Source::Bluesky);
        assert_eq!("twitter".parse::<Source>().unwrap(), Source::X);
        assert!("mastodon".parse::<Source>().is_err());
    }

    #[test]
    fn discord_routes_to_x_and_others_to_bluesky() {
        assert_eq!(Source::Discord.default_targets(), &[TargetPlatform::X]);
        assert_eq!(Source::Bluesky.default_targets(), &[TargetPlatform::Bluesky]);
        assert_eq!(Source::X.default_targets(), &[TargetPlatform::Bluesky]);
    }

    #[test]
    fn label_parses_model_output() {
        assert_eq!("POSITIVE".parse::<Label>().unwrap(), Label::Positive);
        assert_eq!("negative".parse::<Label>().unwrap(), Label::Negative);
        assert_eq!("LABEL_1".parse::<Label>().unwrap(), Label::Positive);
        assert!("NEUTRAL".parse::<Label>().is_err());
    }

    #[test]
    fn label_serializes_uppercase() {
        let json = serde_json::to_string(&Label::Positive).unwrap();
        assert_eq!(json, "\"POSITIVE\"");
    }

    #[test]
    fn posting_key_display_is_stable() {
        let key = PostingKey::new(Source::Discord, "42", TargetPlatform::X);
        assert_eq!(key.to_string(), "discord:42->x");
    }

    #[test]
    fn pending_attempt_keeps_its_key() {
        let key = PostingKey::new(Source::Bluesky, "at://post/1", TargetPlatform::Bluesky);
        let attempt = PostingAttempt::pending(&key, "hello", Utc::now());
        assert_eq!(attempt.key(), key);
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(
            attempt.status.as_str().parse::<AttemptStatus>().unwrap(),
            AttemptStatus::Pending
        );
        assert!("lost".parse::<AttemptStatus>().is_err());
    }
}
