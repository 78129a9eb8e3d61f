use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/pulsecheck-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

pub mod attempts;
pub mod cursors;
pub mod postings;
pub mod records;
pub mod sentiment;
mod store;

pub use attempts::{
    count_posting_attempts, delete_posting_attempt, get_posting_attempt, insert_posting_attempt,
    list_posting_attempts, mark_attempt_ambiguous, PostingAttemptRow,
};
pub use cursors::{compare_and_set_cursor, get_cursor, CursorRow};
pub use postings::{
    get_posting_record, insert_posting_record, list_posting_keys, posts_by_target,
    PostingRecordRow,
};
pub use records::{count_records, upsert_records, RecordRow};
pub use sentiment::{
    count_high_confidence_positive, get_sentiment_result, label_distribution,
    upsert_sentiment_results, SentimentResultRow,
};
pub use store::PgStorage;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &pulsecheck_core::AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error("corrupt {column} value \"{value}\": {reason}")]
    Corrupt {
        column: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<DbError> for pulsecheck_core::StorageError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Corrupt {
                column,
                value,
                reason,
            } => pulsecheck_core::StorageError::Corrupt {
                what: column,
                key: value,
                reason,
            },
            other => pulsecheck_core::StorageError::Backend(Box::new(other)),
        }
    }
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // The _sqlx_migrations table may not exist yet on a fresh database;
    // treat absence as zero applied.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

pub(crate) fn parse_source(value: &str) -> Result<pulsecheck_core::Source, DbError> {
    value.parse().map_err(|e: pulsecheck_core::CoreError| DbError::Corrupt {
        column: "source",
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn parse_target(value: &str) -> Result<pulsecheck_core::TargetPlatform, DbError> {
    value.parse().map_err(|e: pulsecheck_core::CoreError| DbError::Corrupt {
        column: "target_platform",
        value: value.to_string(),
        reason: e.to_string(),
    })
}
