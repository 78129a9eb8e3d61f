//! Importing Discord message exports.
//!
//! An export file holds either one message object or an array of them.
//! Imported messages are stored insert-if-absent, so re-importing a file
//! is harmless, and may be scored in the same pass. Nothing imported is
//! ever published.

use chrono::{DateTime, Utc};
use pulsecheck_core::{Record, Source, Storage};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::PipelineError;
use crate::scorer::SentimentScorer;

/// Records are saved and scored this many at a time.
const IMPORT_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a message object or an array of messages, found {0}")]
    Shape(&'static str),
}

/// Discord ids arrive as strings in API exports and as numbers in some
/// hand-made dumps.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Text(String),
    Number(u64),
}

impl Snowflake {
    fn into_string(self) -> String {
        match self {
            Snowflake::Text(s) => s,
            Snowflake::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExportedAuthor {
    id: Option<Snowflake>,
}

#[derive(Debug, Deserialize)]
struct ExportedMessage {
    id: Option<Snowflake>,
    #[serde(default)]
    content: String,
    timestamp: Option<String>,
    channel_id: Option<Snowflake>,
    author: Option<ExportedAuthor>,
    user_id: Option<Snowflake>,
}

/// Messages parsed from one export file.
#[derive(Debug, Default)]
pub struct DiscordExport {
    pub records: Vec<Record>,
    /// Messages without an id or a readable timestamp.
    pub skipped: usize,
}

/// Totals for an import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub saved: usize,
    pub scored: usize,
    pub unscorable: usize,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn to_record(message: ExportedMessage) -> Result<Record, String> {
    let Some(id) = message.id.map(Snowflake::into_string).filter(|id| !id.is_empty()) else {
        return Err("message has no id".to_string());
    };
    let Some(created_at) = message.timestamp.as_deref().and_then(parse_timestamp) else {
        return Err(format!("message {id} has no readable timestamp"));
    };
    let author = message
        .author
        .and_then(|a| a.id)
        .or(message.user_id)
        .map(Snowflake::into_string)
        .unwrap_or_default();
    Ok(Record {
        source: Source::Discord,
        stream_id: message
            .channel_id
            .map(Snowflake::into_string)
            .unwrap_or_default(),
        record_id: id,
        text: message.content,
        created_at,
        author,
    })
}

/// Parse an export file's contents.
///
/// Individual messages that lack an id or a readable timestamp are skipped
/// with a warning and counted.
///
/// # Errors
///
/// Returns [`ImportError`] if the text is not JSON or is neither an object
/// nor an array.
pub fn parse_discord_export(json: &str) -> Result<DiscordExport, ImportError> {
    let messages = match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        Value::Null => return Err(ImportError::Shape("null")),
        Value::Bool(_) => return Err(ImportError::Shape("a boolean")),
        Value::Number(_) => return Err(ImportError::Shape("a number")),
        Value::String(_) => return Err(ImportError::Shape("a string")),
    };

    let mut export = DiscordExport::default();
    for (position, value) in messages.into_iter().enumerate() {
        let parsed = serde_json::from_value::<ExportedMessage>(value)
            .map_err(|e| e.to_string())
            .and_then(to_record);
        match parsed {
            Ok(record) => export.records.push(record),
            Err(reason) => {
                tracing::warn!(position, reason = %reason, "skipping exported message");
                export.skipped += 1;
            }
        }
    }
    Ok(export)
}

/// Store `records` insert-if-absent and, with a scorer, score them.
///
/// # Errors
///
/// Returns [`PipelineError::Storage`] if storage fails, or
/// [`PipelineError::ScoringUnavailable`] if the classifier stays down.
/// Chunks finished before the failure stay saved.
pub async fn import_records(
    storage: &dyn Storage,
    scorer: Option<&SentimentScorer>,
    records: &[Record],
) -> Result<ImportReport, PipelineError> {
    let mut report = ImportReport::default();
    for chunk in records.chunks(IMPORT_CHUNK) {
        storage.save_records(chunk).await?;
        report.saved += chunk.len();

        if let Some(scorer) = scorer {
            let scored = scorer.score(chunk).await?;
            storage.upsert_sentiments(&scored.results).await?;
            report.scored += scored.results.len();
            report.unscorable += scored.unscorable.len();
        }
        tracing::debug!(saved = report.saved, scored = report.scored, "import chunk stored");
    }
    tracing::info!(
        saved = report.saved,
        scored = report.scored,
        unscorable = report.unscorable,
        "import finished"
    );
    Ok(report)
}
