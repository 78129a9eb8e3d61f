//! Database operations for the `cursors` table.
//!
//! Cursors are stored as tagged JSONB and only ever replaced through a
//! compare-and-set, so two writers racing on the same stream cannot both win.

use chrono::{DateTime, Utc};
use pulsecheck_core::{Cursor, Source};
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `cursors` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CursorRow {
    pub source: String,
    pub stream_id: String,
    pub cursor: Value,
    pub updated_at: DateTime<Utc>,
}

fn decode_cursor(source: Source, stream_id: &str, value: Value) -> Result<Cursor, DbError> {
    serde_json::from_value(value).map_err(|e| DbError::Corrupt {
        column: "cursor",
        value: format!("{source}/{stream_id}"),
        reason: e.to_string(),
    })
}

fn encode_cursor(cursor: &Cursor) -> Result<Value, DbError> {
    serde_json::to_value(cursor).map_err(|e| DbError::Corrupt {
        column: "cursor",
        value: cursor.to_string(),
        reason: e.to_string(),
    })
}

/// Fetch the stored cursor for a stream, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Corrupt`] if
/// the stored JSON is not a valid cursor.
pub async fn get_cursor(
    pool: &PgPool,
    source: Source,
    stream_id: &str,
) -> Result<Option<Cursor>, DbError> {
    let row = sqlx::query_as::<_, CursorRow>(
        "SELECT source, stream_id, cursor, updated_at \
         FROM cursors \
         WHERE source = $1 AND stream_id = $2",
    )
    .bind(source.as_str())
    .bind(stream_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| decode_cursor(source, stream_id, r.cursor))
        .transpose()
}

/// Replace the cursor for a stream only if it currently equals `expected`.
///
/// `expected = None` means the stream must have no cursor yet; the insert
/// then races on the primary key. JSONB equality is structural, so key order
/// in the stored document does not matter.
///
/// Returns `true` when the write happened.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the statement fails.
pub async fn compare_and_set_cursor(
    pool: &PgPool,
    source: Source,
    stream_id: &str,
    expected: Option<&Cursor>,
    new: &Cursor,
) -> Result<bool, DbError> {
    let new_value = encode_cursor(new)?;

    let result = match expected {
        None => {
            sqlx::query(
                "INSERT INTO cursors (source, stream_id, cursor) \
                 VALUES ($1, $2, $3::jsonb) \
                 ON CONFLICT (source, stream_id) DO NOTHING",
            )
            .bind(source.as_str())
            .bind(stream_id)
            .bind(&new_value)
            .execute(pool)
            .await?
        }
        Some(expected) => {
            let expected_value = encode_cursor(expected)?;
            sqlx::query(
                "UPDATE cursors SET \
                     cursor     = $3::jsonb, \
                     updated_at = NOW() \
                 WHERE source = $1 AND stream_id = $2 AND cursor = $4::jsonb",
            )
            .bind(source.as_str())
            .bind(stream_id)
            .bind(&new_value)
            .bind(&expected_value)
            .execute(pool)
            .await?
        }
    };

    Ok(result.rows_affected() == 1)
}
