//! Read-only status and database maintenance commands.

use pulsecheck_core::{AppConfig, StatusSummary, Storage};
use pulsecheck_db::{PgStorage, PoolConfig};

pub(crate) async fn connect(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = PoolConfig::from_app_config(config);
    Ok(pulsecheck_db::connect_pool(&config.database_url, pool_config).await?)
}

fn print_status(summary: &StatusSummary, threshold: f64) {
    println!("records stored:  {}", summary.total_records);
    println!("records scored:  {}", summary.total_scored);
    println!();
    println!("{:<12}COUNT", "LABEL");
    for (label, count) in &summary.by_label {
        println!("{label:<12}{count}");
    }
    println!();
    println!(
        "positive with confidence >= {threshold:.2}: {}",
        summary.high_confidence_positive
    );
    if summary.unresolved_attempts > 0 {
        println!(
            "posting attempts awaiting reconciliation: {} (run `pulsecheck reconcile list`)",
            summary.unresolved_attempts
        );
    }
    println!();
    if summary.posts_by_target.is_empty() {
        println!("no posts recorded yet");
        return;
    }
    println!("{:<12}POSTS", "TARGET");
    for (target, count) in &summary.posts_by_target {
        println!("{target:<12}{count}");
    }
}

/// Print the sentiment distribution and posting counts.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a query fails.
pub(crate) async fn run_status(config: &AppConfig) -> anyhow::Result<()> {
    let storage = PgStorage::new(connect(config).await?);
    let summary = storage
        .status_summary(config.confidence_threshold)
        .await?;
    print_status(&summary, config.confidence_threshold);
    Ok(())
}

/// # Errors
///
/// Returns an error if the database cannot be reached.
pub(crate) async fn run_db_ping(config: &AppConfig) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    pulsecheck_db::ping(&pool).await?;
    println!("database ok");
    Ok(())
}

/// # Errors
///
/// Returns an error if the database cannot be reached or a migration fails.
pub(crate) async fn run_db_migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    let applied = pulsecheck_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations complete");
    println!("applied {applied} migration(s)");
    Ok(())
}
