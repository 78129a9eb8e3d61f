use pulsecheck_core::{CoreError, PostingKey, Source, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transient fetch failures outlasted the retry budget.
    #[error("fetch unavailable for {platform}/{stream_id}: {reason}")]
    FetchUnavailable {
        platform: Source,
        stream_id: String,
        reason: String,
    },

    /// The stream no longer exists or is no longer readable.
    #[error("stream {platform}/{stream_id} is gone: {reason}")]
    StreamGone {
        platform: Source,
        stream_id: String,
        reason: String,
    },

    #[error("sentiment scoring unavailable: {0}")]
    ScoringUnavailable(String),

    /// A post may or may not have been published; needs reconciliation.
    #[error("ambiguous post outcome for {key}: {reason}")]
    AmbiguousPostOutcome { key: PostingKey, reason: String },

    /// The target refused this record's post. Permanent for the record.
    #[error("post rejected for {key}: {reason}")]
    PostRejected { key: PostingKey, reason: String },

    /// Transient post failures outlasted the retry budget.
    #[error("posting unavailable for {key}: {reason}")]
    PublishUnavailable { key: PostingKey, reason: String },

    #[error("credentials rejected by {platform}: {reason}")]
    Unauthorized { platform: String, reason: String },

    #[error("no posting connector configured for {0}")]
    NoPublisher(String),

    #[error("no unresolved posting attempt for {0}")]
    NoAttempt(PostingKey),

    #[error("cursor for {platform}/{stream_id} would move backwards (stored {stored}, new {proposed})")]
    StaleCursor {
        platform: Source,
        stream_id: String,
        stored: String,
        proposed: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Whether the stream must stop being processed until an operator acts.
    #[must_use]
    pub fn halts_stream(&self) -> bool {
        matches!(
            self,
            PipelineError::StreamGone { .. }
                | PipelineError::AmbiguousPostOutcome { .. }
                | PipelineError::Unauthorized { .. }
        )
    }

    /// Failures that only affect a single record; the record counts as done.
    #[must_use]
    pub fn is_permanent_per_record(&self) -> bool {
        matches!(self, PipelineError::PostRejected { .. })
    }
}
