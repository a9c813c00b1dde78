use clap::{Args, Parser, Subcommand, ValueEnum};
use indexpilot::audit::AuditLog;
use indexpilot::config::{DbConfig, Mode, Settings};
use indexpilot::core::Core;
use indexpilot::fk;
use indexpilot::hooks::{AlwaysOpenWindow, Hooks, LockManagedDdl};
use indexpilot::scheduler::{Applier, BatchOptions, PassOptions, PassSummary};
use sqlx::postgres::PgPoolOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Autonomous index advisor and applier for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "indexpilot")]
#[command(version = "0.1.0")]
#[command(about = "Observes query activity and creates or recommends indexes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Database host
    #[arg(
        short = 'H',
        long = "host",
        env = "POSTGRES_HOST",
        default_value = "localhost"
    )]
    host: String,

    /// Database port
    #[arg(long = "port", env = "POSTGRES_PORT", default_value = "5432")]
    port: u16,

    /// Database name
    #[arg(short = 'd', long = "database", env = "POSTGRES_DATABASE")]
    database: String,

    /// Username
    #[arg(short = 'u', long = "username", env = "POSTGRES_USER")]
    username: String,

    /// Password
    #[arg(short = 'p', long = "password", env = "POSTGRES_PASSWORD")]
    password: String,

    /// Path to a YAML settings file
    #[arg(short = 'c', long = "config")]
    config_path: Option<String>,
}

/// Output format for decision summaries.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// Plain text summary
    Text,
    /// JSON formatted summary
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one decision pass over recent query stats
    Analyze {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Override the configured mode (advisory = report only)
        #[arg(long = "mode", value_enum)]
        mode: Option<Mode>,

        /// Stats window in hours
        #[arg(long = "window-hours", default_value = "24")]
        window_hours: u32,

        /// Minimum queries in the window to consider a candidate
        #[arg(long = "min-queries", default_value = "100")]
        min_queries: i64,

        /// Output format
        #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
        format: ReportFormat,
    },
    /// Run the paced batch applier
    Batch {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Stats window in hours
        #[arg(long = "window-hours", default_value = "24")]
        window_hours: u32,

        /// Minimum queries in the window to consider a candidate
        #[arg(long = "min-queries", default_value = "100")]
        min_queries: i64,

        /// Indexes per batch (defaults to the configured value, 3)
        #[arg(long = "max-per-batch")]
        max_per_batch: Option<usize>,

        /// Pause between batches in seconds (defaults to the configured value, 300)
        #[arg(long = "pause-secs")]
        pause_secs: Option<u64>,

        /// Output format
        #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
        format: ReportFormat,
    },
    /// Report foreign keys without a backing index
    FkGaps {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

fn load_settings(path: Option<&str>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Ok(Settings::from_file(path)?),
        None => Ok(Settings::default()),
    }
}

async fn connect(connection: &ConnectionArgs) -> anyhow::Result<sqlx::PgPool> {
    let config = DbConfig::from_connection_params(
        connection.host.clone(),
        connection.port,
        connection.database.clone(),
        connection.username.clone(),
        connection.password.clone(),
    );
    info!("Connecting to PostgreSQL at {}:{}", config.host, config.port);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.connection_string())
        .await?;
    info!("Successfully connected to database: {}", config.database);
    Ok(pool)
}

fn print_summary(summary: &PassSummary, format: ReportFormat) {
    match format {
        ReportFormat::Json => match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("failed to serialize summary: {err}"),
        },
        ReportFormat::Text => print_text_summary(summary),
    }
}

fn print_text_summary(summary: &PassSummary) {
    println!("\nIndex decision summary:");
    println!("  Applied/advised: {}", summary.created.len());
    for applied in &summary.created {
        let mode = if applied.advisory { "advisory" } else { "applied" };
        let improvement = applied
            .improvement_pct
            .map(|pct| format!(", improvement {pct:.1}%"))
            .unwrap_or_default();
        println!(
            "    [{mode}] {} on {}.{} ({} {}, queries {}, confidence {:.2}, {}{improvement})",
            applied.index_name,
            applied.table,
            applied.field,
            applied.method,
            applied.strategy,
            applied.queries,
            applied.confidence,
            applied.reason,
        );
    }
    println!("  Skipped: {}", summary.skipped.len());
    for skipped in &summary.skipped {
        println!(
            "    {}.{} (queries {}): {}",
            skipped.table, skipped.field, skipped.queries, skipped.reason
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Analyze {
            connection,
            mode,
            window_hours,
            min_queries,
            format,
        } => {
            let settings = load_settings(connection.config_path.as_deref())?;
            let pool = connect(&connection).await?;

            let core = Core::new(settings);
            core.validator.load_catalog(&pool).await;
            let mut hooks = Hooks::host_defaults(&core.settings.features.safeguards);
            let advisory = mode
                .unwrap_or(core.settings.features.auto_indexer.mode)
                .is_advisory();
            if advisory {
                // Advisory passes issue no DDL, so the window never gates them.
                hooks.maintenance = Box::new(AlwaysOpenWindow);
            }
            let audit = AuditLog::new(pool.clone());
            let ddl = LockManagedDdl::new(pool.clone(), hooks.cpu.clone());
            let applier = Applier::new(&pool, &core, &hooks, &audit, &ddl);

            let summary = applier
                .run_pass(PassOptions {
                    window_hours,
                    min_query_threshold: min_queries,
                    mode,
                })
                .await;
            print_summary(&summary, format);
        }
        Commands::Batch {
            connection,
            window_hours,
            min_queries,
            max_per_batch,
            pause_secs,
            format,
        } => {
            let settings = load_settings(connection.config_path.as_deref())?;
            let pool = connect(&connection).await?;

            let core = Core::new(settings);
            core.validator.load_catalog(&pool).await;
            let safeguards = core.settings.features.safeguards.clone();
            let hooks = Hooks::host_defaults(&safeguards);
            let audit = AuditLog::new(pool.clone());
            let ddl = LockManagedDdl::new(pool.clone(), hooks.cpu.clone());
            let applier = Applier::new(&pool, &core, &hooks, &audit, &ddl);

            // Cancellation lands between candidates, never mid-create.
            let stop = Arc::new(AtomicBool::new(false));
            let stop_signal = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("cancellation requested, stopping after current candidate");
                    stop_signal.store(true, Ordering::Relaxed);
                }
            });

            let summary = applier
                .run_batch(
                    BatchOptions {
                        pass: PassOptions {
                            window_hours,
                            min_query_threshold: min_queries,
                            mode: None,
                        },
                        max_per_batch: max_per_batch.unwrap_or(safeguards.max_per_batch),
                        max_batches: 3,
                        inter_create_pause: Duration::from_secs(
                            safeguards.inter_create_pause_secs,
                        ),
                        inter_batch_pause: Duration::from_secs(
                            pause_secs.unwrap_or(safeguards.inter_batch_pause_secs),
                        ),
                    },
                    &stop,
                )
                .await;
            print_summary(&summary, format);
        }
        Commands::FkGaps { connection } => {
            let _settings = load_settings(connection.config_path.as_deref())?;
            let pool = connect(&connection).await?;

            let gaps = fk::find_unindexed_foreign_keys(&pool).await?;
            if gaps.is_empty() {
                println!("All foreign keys are backed by indexes.");
            } else {
                println!("Foreign keys without a backing index:");
                for gap in gaps {
                    println!(
                        "  {}.{} -> {}.{} (constraint {})",
                        gap.table,
                        gap.column,
                        gap.referenced_table,
                        gap.referenced_column,
                        gap.constraint
                    );
                }
            }
        }
    }

    Ok(())
}
