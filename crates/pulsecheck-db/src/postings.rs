//! Database operations for the `posting_records` table.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use pulsecheck_core::{InsertOutcome, PostingKey, PostingRecord, Source};
use sqlx::PgPool;

use crate::{parse_source, parse_target, DbError};

/// A row from the `posting_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostingRecordRow {
    pub id: i64,
    pub source: String,
    pub record_id: String,
    pub target_platform: String,
    pub posted_at: DateTime<Utc>,
    pub external_post_id: String,
}

impl TryFrom<PostingRecordRow> for PostingRecord {
    type Error = DbError;

    fn try_from(row: PostingRecordRow) -> Result<Self, Self::Error> {
        Ok(PostingRecord {
            source: parse_source(&row.source)?,
            record_id: row.record_id,
            target_platform: parse_target(&row.target_platform)?,
            posted_at: row.posted_at,
            external_post_id: row.external_post_id,
        })
    }
}

/// Fetch the posting record for a key, if one exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_posting_record(
    pool: &PgPool,
    key: &PostingKey,
) -> Result<Option<PostingRecord>, DbError> {
    let row = sqlx::query_as::<_, PostingRecordRow>(
        "SELECT id, source, record_id, target_platform, posted_at, external_post_id \
         FROM posting_records \
         WHERE source = $1 AND record_id = $2 AND target_platform = $3",
    )
    .bind(key.source.as_str())
    .bind(&key.record_id)
    .bind(key.target.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(PostingRecord::try_from).transpose()
}

/// Insert a posting record under the `(source, record_id, target_platform)`
/// unique constraint and delete any attempt for the same key, in one
/// transaction.
///
/// On conflict nothing is written and the stored row is returned as
/// [`InsertOutcome::Existing`].
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a statement fails, or [`DbError::NotFound`]
/// if the conflicting row vanished between the insert and the re-read.
pub async fn insert_posting_record(
    pool: &PgPool,
    record: &PostingRecord,
) -> Result<InsertOutcome, DbError> {
    let mut tx = pool.begin().await?;

    let inserted: Option<i64> = sqlx::query_scalar::<_, i64>(
        "INSERT INTO posting_records \
             (source, record_id, target_platform, posted_at, external_post_id) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (source, record_id, target_platform) DO NOTHING \
         RETURNING id",
    )
    .bind(record.source.as_str())
    .bind(&record.record_id)
    .bind(record.target_platform.as_str())
    .bind(record.posted_at)
    .bind(&record.external_post_id)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query(
        "DELETE FROM posting_attempts \
         WHERE source = $1 AND record_id = $2 AND target_platform = $3",
    )
    .bind(record.source.as_str())
    .bind(&record.record_id)
    .bind(record.target_platform.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if inserted.is_some() {
        return Ok(InsertOutcome::Inserted);
    }

    let existing = get_posting_record(pool, &record.key())
        .await?
        .ok_or(DbError::NotFound)?;
    Ok(InsertOutcome::Existing(existing))
}

/// All posting keys stored for the given records of one source.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_posting_keys(
    pool: &PgPool,
    source: Source,
    record_ids: &[String],
) -> Result<HashSet<PostingKey>, DbError> {
    if record_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT record_id, target_platform \
         FROM posting_records \
         WHERE source = $1 AND record_id = ANY($2)",
    )
    .bind(source.as_str())
    .bind(record_ids)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(record_id, target)| {
            Ok(PostingKey {
                source,
                record_id,
                target: parse_target(&target)?,
            })
        })
        .collect()
}

/// Number of posts per target platform, ordered by platform.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn posts_by_target(pool: &PgPool) -> Result<Vec<(String, i64)>, DbError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT target_platform, COUNT(*) \
         FROM posting_records \
         GROUP BY target_platform \
         ORDER BY target_platform",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
