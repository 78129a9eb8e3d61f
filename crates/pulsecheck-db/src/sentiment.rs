//! Database operations for the `sentiment_results` table.

use chrono::{DateTime, Utc};
use pulsecheck_core::{Label, SentimentResult, Source};
use serde_json::Value;
use sqlx::PgPool;

use crate::{parse_source, DbError};

/// A row from the `sentiment_results` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SentimentResultRow {
    pub source: String,
    pub record_id: String,
    pub label: String,
    pub confidence: f64,
    /// JSON array of strings.
    pub topics: Value,
    pub scored_at: DateTime<Utc>,
}

impl TryFrom<SentimentResultRow> for SentimentResult {
    type Error = DbError;

    fn try_from(row: SentimentResultRow) -> Result<Self, Self::Error> {
        let label: Label = row.label.parse().map_err(|e: pulsecheck_core::CoreError| {
            DbError::Corrupt {
                column: "label",
                value: row.label.clone(),
                reason: e.to_string(),
            }
        })?;
        let topics: Vec<String> =
            serde_json::from_value(row.topics.clone()).map_err(|e| DbError::Corrupt {
                column: "topics",
                value: row.topics.to_string(),
                reason: e.to_string(),
            })?;
        Ok(SentimentResult {
            source: parse_source(&row.source)?,
            record_id: row.record_id,
            label,
            confidence: row.confidence,
            topics,
        })
    }
}

/// Insert or overwrite sentiment results keyed by `(source, record_id)`.
///
/// Re-scoring a record replaces its label, confidence and topics.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_sentiment_results(
    pool: &PgPool,
    results: &[SentimentResult],
) -> Result<(), DbError> {
    if results.is_empty() {
        return Ok(());
    }

    let mut sources: Vec<&str> = Vec::with_capacity(results.len());
    let mut record_ids: Vec<&str> = Vec::with_capacity(results.len());
    let mut labels: Vec<&str> = Vec::with_capacity(results.len());
    let mut confidences: Vec<f64> = Vec::with_capacity(results.len());
    let mut topics: Vec<Value> = Vec::with_capacity(results.len());

    for result in results {
        sources.push(result.source.as_str());
        record_ids.push(&result.record_id);
        labels.push(result.label.as_str());
        confidences.push(result.confidence.clamp(0.0, 1.0));
        topics.push(Value::from(result.topics.clone()));
    }

    sqlx::query(
        "INSERT INTO sentiment_results (source, record_id, label, confidence, topics) \
         SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::float8[], $5::jsonb[]) \
         ON CONFLICT (source, record_id) DO UPDATE SET \
             label      = EXCLUDED.label, \
             confidence = EXCLUDED.confidence, \
             topics     = EXCLUDED.topics, \
             scored_at  = NOW()",
    )
    .bind(&sources)
    .bind(&record_ids)
    .bind(&labels)
    .bind(&confidences)
    .bind(&topics)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the sentiment result for one record.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails or [`DbError::Corrupt`] if
/// the stored row cannot be decoded.
pub async fn get_sentiment_result(
    pool: &PgPool,
    source: Source,
    record_id: &str,
) -> Result<Option<SentimentResult>, DbError> {
    let row = sqlx::query_as::<_, SentimentResultRow>(
        "SELECT source, record_id, label, confidence, topics, scored_at \
         FROM sentiment_results \
         WHERE source = $1 AND record_id = $2",
    )
    .bind(source.as_str())
    .bind(record_id)
    .fetch_optional(pool)
    .await?;

    row.map(SentimentResult::try_from).transpose()
}

/// Count of scored results per label, ordered by label.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn label_distribution(pool: &PgPool) -> Result<Vec<(String, i64)>, DbError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT label, COUNT(*) \
         FROM sentiment_results \
         GROUP BY label \
         ORDER BY label",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Number of positive results whose confidence is at least `threshold`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_high_confidence_positive(
    pool: &PgPool,
    threshold: f64,
) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sentiment_results \
         WHERE label = 'POSITIVE' AND confidence >= $1",
    )
    .bind(threshold)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
