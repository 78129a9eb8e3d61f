//! Resumable ingestion pipeline for PulseCheck.
//!
//! Fetches new records from platform connectors, scores them with a
//! pluggable classifier, selects confident positive findings and publishes
//! each at most once per target, resuming from per-stream cursors. Batch
//! mode drains every stream once; [`LivePoller`] interleaves platforms under
//! per-platform rate budgets for a bounded duration.

pub mod batch;
pub mod classifier;
pub mod connectors;
pub mod cursor_store;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod memory;
pub mod import;
pub mod poller;
pub mod rate_budget;
pub mod reconcile;
pub mod retry;
pub mod scorer;

pub use batch::{BatchReport, Pipeline, PipelineSettings, RunSummary, StreamFailure};
pub use classifier::{build_classifier, Classification, Classifier, ClassifierError};
pub use connectors::{
    build_connectors, ConnectorError, Connectors, PlatformConnector, PostingConnector,
};
pub use cursor_store::{CursorMode, CursorStore};
pub use dispatcher::{compose_post, DryRunDispatcher, PosterDispatcher, Publish, PublishOutcome};
pub use error::PipelineError;
pub use fetcher::BatchFetcher;
pub use filter::{select, SelectionCriteria};
pub use memory::MemoryStorage;
pub use import::{import_records, parse_discord_export, DiscordExport, ImportError, ImportReport};
pub use poller::{LivePoller, PlatformState};
pub use rate_budget::RateBudget;
pub use reconcile::{ReconcileOutcome, Reconciler, Resolution};
pub use scorer::{extract_topics, ScoredBatch, SentimentScorer, TextScore};
