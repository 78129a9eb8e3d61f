//! `import` command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use pulsecheck_core::AppConfig;
use pulsecheck_db::PgStorage;
use pulsecheck_pipeline::{build_classifier, import_records, parse_discord_export, SentimentScorer};

use crate::status::connect;
use crate::ImportArgs;

/// The file itself, or every `*.json` file directly inside a directory,
/// in name order.
pub(crate) fn export_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("reading {}", path.display()))? {
        let file = entry?.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Import Discord export files. Returns whether every file was read.
///
/// # Errors
///
/// Returns an error if the path, the database or the classifier cannot be
/// set up, or if storing fails.
pub(crate) async fn run_discord(config: &AppConfig, args: &ImportArgs) -> anyhow::Result<bool> {
    let files = export_files(&args.path)?;
    if files.is_empty() {
        println!("no .json files under {}", args.path.display());
        return Ok(true);
    }

    let scorer = if args.no_score {
        None
    } else {
        Some(SentimentScorer::new(
            build_classifier(config)?,
            config.score_batch_size,
            config.max_retries,
            config.retry_backoff_base_ms,
        ))
    };
    let pool = connect(config).await?;
    pulsecheck_db::run_migrations(&pool).await?;
    let storage = Arc::new(PgStorage::new(pool));

    let mut all_read = true;
    for file in &files {
        let parsed = tokio::fs::read_to_string(file)
            .await
            .map_err(anyhow::Error::from)
            .and_then(|text| parse_discord_export(&text).map_err(anyhow::Error::from));
        let export = match parsed {
            Ok(export) => export,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping export file");
                println!("SKIPPED {}: {e}", file.display());
                all_read = false;
                continue;
            }
        };

        let report = import_records(storage.as_ref(), scorer.as_ref(), &export.records)
            .await
            .with_context(|| format!("importing {}", file.display()))?;
        println!(
            "{}: saved {}  scored {}  unscorable {}  skipped {}",
            file.display(),
            report.saved,
            report.scored,
            report.unscorable,
            export.skipped,
        );
    }
    Ok(all_read)
}
