//! Database operations for the `posting_attempts` table.

use chrono::{DateTime, Utc};
use pulsecheck_core::{AttemptStart, AttemptStatus, PostingAttempt, PostingKey};
use sqlx::PgPool;

use crate::{parse_source, parse_target, DbError};

/// A row from the `posting_attempts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostingAttemptRow {
    pub source: String,
    pub record_id: String,
    pub target_platform: String,
    pub text: String,
    pub status: String,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl TryFrom<PostingAttemptRow> for PostingAttempt {
    type Error = DbError;

    fn try_from(row: PostingAttemptRow) -> Result<Self, Self::Error> {
        let status: AttemptStatus =
            row.status
                .parse()
                .map_err(|e: pulsecheck_core::CoreError| DbError::Corrupt {
                    column: "status",
                    value: row.status.clone(),
                    reason: e.to_string(),
                })?;
        Ok(PostingAttempt {
            source: parse_source(&row.source)?,
            record_id: row.record_id,
            target_platform: parse_target(&row.target_platform)?,
            text: row.text,
            status,
            reason: row.reason,
            started_at: row.started_at,
        })
    }
}

const SELECT_ATTEMPT: &str = "SELECT source, record_id, target_platform, text, status, reason, \
     started_at FROM posting_attempts";

/// Fetch the attempt for a key, if one exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_posting_attempt(
    pool: &PgPool,
    key: &PostingKey,
) -> Result<Option<PostingAttempt>, DbError> {
    let row = sqlx::query_as::<_, PostingAttemptRow>(&format!(
        "{SELECT_ATTEMPT} WHERE source = $1 AND record_id = $2 AND target_platform = $3"
    ))
    .bind(key.source.as_str())
    .bind(&key.record_id)
    .bind(key.target.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(PostingAttempt::try_from).transpose()
}

/// Insert an attempt unless one already exists for its key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a statement fails, or [`DbError::NotFound`]
/// if the conflicting row vanished between the insert and the re-read.
pub async fn insert_posting_attempt(
    pool: &PgPool,
    attempt: &PostingAttempt,
) -> Result<AttemptStart, DbError> {
    let inserted = sqlx::query(
        "INSERT INTO posting_attempts \
             (source, record_id, target_platform, text, status, reason, started_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (source, record_id, target_platform) DO NOTHING",
    )
    .bind(attempt.source.as_str())
    .bind(&attempt.record_id)
    .bind(attempt.target_platform.as_str())
    .bind(&attempt.text)
    .bind(attempt.status.as_str())
    .bind(&attempt.reason)
    .bind(attempt.started_at)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(AttemptStart::Started);
    }
    let existing = get_posting_attempt(pool, &attempt.key())
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(AttemptStart::Unresolved(existing))
}

/// Flag an attempt as ambiguous with the reason it could not be settled.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_attempt_ambiguous(
    pool: &PgPool,
    key: &PostingKey,
    reason: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE posting_attempts SET status = 'ambiguous', reason = $4 \
         WHERE source = $1 AND record_id = $2 AND target_platform = $3",
    )
    .bind(key.source.as_str())
    .bind(&key.record_id)
    .bind(key.target.as_str())
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete the attempt for a key. Returns whether a row was removed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_posting_attempt(pool: &PgPool, key: &PostingKey) -> Result<bool, DbError> {
    let deleted = sqlx::query(
        "DELETE FROM posting_attempts \
         WHERE source = $1 AND record_id = $2 AND target_platform = $3",
    )
    .bind(key.source.as_str())
    .bind(&key.record_id)
    .bind(key.target.as_str())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(deleted > 0)
}

/// Every attempt on file, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_posting_attempts(pool: &PgPool) -> Result<Vec<PostingAttempt>, DbError> {
    let rows = sqlx::query_as::<_, PostingAttemptRow>(&format!(
        "{SELECT_ATTEMPT} ORDER BY started_at, source, record_id, target_platform"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(PostingAttempt::try_from).collect()
}

/// Number of attempts waiting for reconciliation.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_posting_attempts(pool: &PgPool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posting_attempts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
