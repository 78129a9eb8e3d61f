//! Shared domain types, cursor semantics, storage capability and
//! configuration for PulseCheck.

use thiserror::Error;

pub mod app_config;
pub mod config;
pub mod cursor;
pub mod storage;
pub mod types;

pub use app_config::{
    AppConfig, BlueskyCredentials, ClassifierKind, DiscordCredentials, XCredentials,
};
pub use config::{load_app_config, load_app_config_from_env};
pub use cursor::{advance_cursor, Cursor, DEFAULT_RECENT_WINDOW};
pub use storage::{AttemptStart, InsertOutcome, Storage, StorageError};
pub use types::{
    AttemptStatus, Label, PostingAttempt, PostingKey, PostingRecord, Record, SentimentResult,
    Source, StatusSummary, TargetPlatform,
};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("unknown sentiment label: {0}")]
    UnknownLabel(String),

    #[error("unknown posting attempt status: {0}")]
    UnknownAttemptStatus(String),

    #[error("malformed {source_name} record id \"{record_id}\"")]
    MalformedRecordId {
        source_name: String,
        record_id: String,
    },

    #[error("stored cursor kind does not match {0} stream semantics")]
    CursorKindMismatch(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
