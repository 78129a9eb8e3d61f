//! Database operations for the `records` table.

use chrono::{DateTime, Utc};
use pulsecheck_core::Record;
use sqlx::PgPool;

use crate::{parse_source, DbError};

/// A row from the `records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    pub source: String,
    pub record_id: String,
    pub stream_id: String,
    pub text: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(Record {
            source: parse_source(&row.source)?,
            stream_id: row.stream_id,
            record_id: row.record_id,
            text: row.text,
            created_at: row.created_at,
            author: row.author,
        })
    }
}

/// Insert fetched records in a single `UNNEST` round-trip.
///
/// Records are immutable once fetched, so a conflict on
/// `(source, record_id)` leaves the stored row untouched. Returns the number
/// of rows that were newly inserted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn upsert_records(pool: &PgPool, records: &[Record]) -> Result<u64, DbError> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut sources: Vec<&str> = Vec::with_capacity(records.len());
    let mut record_ids: Vec<&str> = Vec::with_capacity(records.len());
    let mut stream_ids: Vec<&str> = Vec::with_capacity(records.len());
    let mut texts: Vec<&str> = Vec::with_capacity(records.len());
    let mut authors: Vec<&str> = Vec::with_capacity(records.len());
    let mut created_ats: Vec<DateTime<Utc>> = Vec::with_capacity(records.len());

    for record in records {
        sources.push(record.source.as_str());
        record_ids.push(&record.record_id);
        stream_ids.push(&record.stream_id);
        texts.push(&record.text);
        authors.push(&record.author);
        created_ats.push(record.created_at);
    }

    let result = sqlx::query(
        "INSERT INTO records (source, record_id, stream_id, text, author, created_at) \
         SELECT * FROM UNNEST(\
              $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::timestamptz[]) \
         ON CONFLICT (source, record_id) DO NOTHING",
    )
    .bind(&sources)
    .bind(&record_ids)
    .bind(&stream_ids)
    .bind(&texts)
    .bind(&authors)
    .bind(&created_ats)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Total number of stored records.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_records(pool: &PgPool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
