//! `reconcile` command handlers.

use std::collections::HashMap;
use std::sync::Arc;

use pulsecheck_core::{AppConfig, PostingKey, Storage};
use pulsecheck_db::PgStorage;
use pulsecheck_pipeline::{build_connectors, Connectors, ReconcileOutcome, Reconciler, Resolution};

use crate::status::connect;
use crate::ResolveArgs;

impl ResolveArgs {
    pub(crate) fn key(&self) -> PostingKey {
        PostingKey::new(self.source, &self.record_id, self.target)
    }

    pub(crate) fn resolution(&self) -> Resolution {
        match &self.posted_as {
            Some(id) => Resolution::PostedAs(id.clone()),
            None => Resolution::NotPosted,
        }
    }
}

async fn reconciler(config: &AppConfig, with_targets: bool) -> anyhow::Result<Reconciler> {
    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(connect(config).await?));
    let targets = if with_targets {
        let Connectors { targets, .. } = build_connectors(config)?;
        targets
    } else {
        HashMap::new()
    };
    Ok(Reconciler::new(storage, targets))
}

fn describe(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Recorded(posting) => {
            format!("recorded as {}", posting.external_post_id)
        }
        ReconcileOutcome::Cleared => "cleared, will be posted again".to_string(),
        ReconcileOutcome::Unresolved(reason) => format!("unresolved: {reason}"),
    }
}

/// # Errors
///
/// Returns an error if the database is unreachable.
pub(crate) async fn run_list(config: &AppConfig) -> anyhow::Result<()> {
    let attempts = reconciler(config, false).await?.pending().await?;
    if attempts.is_empty() {
        println!("no posting attempts awaiting reconciliation");
        return Ok(());
    }
    println!("{:<10}{:<24}{:<10}{:<11}STARTED", "SOURCE", "RECORD", "TARGET", "STATUS");
    for attempt in &attempts {
        println!(
            "{:<10}{:<24}{:<10}{:<11}{}",
            attempt.source.to_string(),
            attempt.record_id,
            attempt.target_platform.to_string(),
            attempt.status.to_string(),
            attempt.started_at.to_rfc3339(),
        );
        if let Some(reason) = &attempt.reason {
            println!("    {reason}");
        }
    }
    Ok(())
}

/// Look every attempt up on its target. Returns whether all were settled.
///
/// # Errors
///
/// Returns an error if connectors or the database cannot be set up.
pub(crate) async fn run_check(config: &AppConfig) -> anyhow::Result<bool> {
    let outcomes = reconciler(config, true).await?.check_all().await?;
    let mut settled = true;
    for (attempt, outcome) in &outcomes {
        settled &= !matches!(outcome, ReconcileOutcome::Unresolved(_));
        println!("{}: {}", attempt.key(), describe(outcome));
    }
    println!("{} attempt(s) checked", outcomes.len());
    Ok(settled)
}

/// # Errors
///
/// Returns an error if no attempt is on file for the key or the database
/// fails.
pub(crate) async fn run_resolve(config: &AppConfig, args: &ResolveArgs) -> anyhow::Result<()> {
    let key = args.key();
    let outcome = reconciler(config, false)
        .await?
        .resolve(&key, args.resolution())
        .await?;
    println!("{key}: {}", describe(&outcome));
    Ok(())
}
