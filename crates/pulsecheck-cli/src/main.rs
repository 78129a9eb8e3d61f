mod import;
mod reconcile;
mod run;
mod status;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use pulsecheck_core::{ConfigError, Source, TargetPlatform};
use pulsecheck_pipeline::{ClassifierError, ConnectorError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pulsecheck")]
#[command(about = "Collect social posts, score sentiment and republish positive findings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by batch and live runs.
#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    /// Platform to collect from; repeat for several (default: every configured one)
    #[arg(long = "platform", value_name = "PLATFORM")]
    pub platforms: Vec<Source>,

    /// Target to publish to; repeat for several (default: per-source routing)
    #[arg(long = "target", value_name = "TARGET")]
    pub targets: Vec<TargetPlatform>,

    /// Maximum number of findings published in this run
    #[arg(long, default_value_t = 5)]
    pub limit: usize,

    /// Only records newer than this many days are eligible
    #[arg(long, default_value_t = 7)]
    pub days: u32,

    /// Run the whole pipeline but log posts instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub(crate) struct LiveArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// How long to keep polling
    #[arg(long, default_value_t = 2)]
    pub duration_minutes: u64,

    /// Poll only this stream id (channel, user id or handle)
    #[arg(long)]
    pub stream: Option<String>,
}

/// Which posting attempt to settle, and how.
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("resolution").required(true).args(["posted_as", "not_posted"])))]
pub(crate) struct ResolveArgs {
    #[arg(long)]
    pub source: Source,

    #[arg(long)]
    pub record_id: String,

    #[arg(long)]
    pub target: TargetPlatform,

    /// The post exists on the target with this id
    #[arg(long, value_name = "POST_ID")]
    pub posted_as: Option<String>,

    /// The post does not exist; allow it to be published again
    #[arg(long)]
    pub not_posted: bool,
}

#[derive(Debug, Args)]
pub(crate) struct ImportArgs {
    /// Export file, or a directory of `*.json` export files
    pub path: PathBuf,

    /// Store the messages without scoring them
    #[arg(long)]
    pub no_score: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Drain every configured stream once
    Batch(RunArgs),
    /// Poll platforms round-robin under their rate budgets for a fixed time
    Live(LiveArgs),
    /// Show sentiment distribution and posting counts
    Status,
    /// Settle posting attempts whose outcome is unknown
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
    /// Load exported messages into the database
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[derive(Debug, Subcommand)]
enum ReconcileCommands {
    /// List attempts awaiting reconciliation
    List,
    /// Look each attempt up on its target and record the posts found
    Check,
    /// Settle one attempt by hand
    Resolve(ResolveArgs),
}

#[derive(Debug, Subcommand)]
enum ImportCommands {
    /// Discord message export (one message object or an array)
    Discord(ImportArgs),
}

/// A run that cannot start because of how it was invoked.
#[derive(Debug)]
pub(crate) struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

/// 2 for configuration and usage problems, 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    let config_problem = err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<UsageError>().is_some()
        || matches!(
            err.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::Config(_))
        )
        || matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::Setup(_))
        );
    if config_problem {
        2
    } else {
        1
    }
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

async fn dispatch(command: Commands, config: &pulsecheck_core::AppConfig) -> anyhow::Result<bool> {
    match command {
        Commands::Batch(args) => run::run_batch(config, &args).await,
        Commands::Live(args) => run::run_live(config, &args).await,
        Commands::Status => status::run_status(config).await.map(|()| true),
        Commands::Reconcile { command } => match command {
            ReconcileCommands::List => reconcile::run_list(config).await.map(|()| true),
            ReconcileCommands::Check => reconcile::run_check(config).await,
            ReconcileCommands::Resolve(args) => {
                reconcile::run_resolve(config, &args).await.map(|()| true)
            }
        },
        Commands::Import { command } => match command {
            ImportCommands::Discord(args) => import::run_discord(config, &args).await,
        },
        Commands::Db { command } => match command {
            DbCommands::Ping => status::run_db_ping(config).await.map(|()| true),
            DbCommands::Migrate => status::run_db_migrate(config).await.map(|()| true),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        // Help output failing to print is not worth a non-zero exit.
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    let config = match pulsecheck_core::load_app_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("invalid log filter: {e}");
        return ExitCode::from(2);
    }

    match dispatch(command, &config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "command failed");
            eprintln!("error: {message}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
