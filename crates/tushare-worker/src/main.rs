//! Tushare worker binary.
//!
//! Runs download tasks on independent workers, each with its own database
//! session.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tushare_engine::db::{create_pool, health_check};
use tushare_engine::engine::date_expr;
use tushare_engine::{DatabaseConfig, Dispatcher, EngineConfig};

#[derive(Parser)]
#[command(name = "tushare-worker")]
#[command(version, about = "Runs Tushare download tasks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more download tasks and wait for them to finish
    ///
    /// Examples:
    ///     tushare-worker run 12
    ///     tushare-worker run 12 13 14 --date 20240520
    ///     tushare-worker run 12 --date today-1
    #[command(verbatim_doc_comment)]
    Run {
        /// Task IDs
        #[arg(required = true)]
        task_ids: Vec<i64>,

        /// Logical download date (YYYYMMDD or a today[+-N] expression)
        #[arg(long, value_parser = parse_date)]
        date: Option<String>,
    },
    /// Check database connectivity
    Check,
}

fn parse_date(value: &str) -> Result<String, String> {
    if let Some(date) = date_expr::evaluate_today(value) {
        return Ok(date);
    }
    let value = value.trim();
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(value.to_string())
    } else {
        Err(format!("expected YYYYMMDD or today[+-N], got '{}'", value))
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tushare_engine=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    let cli = Cli::parse();

    let database = DatabaseConfig::from_env()?;
    let engine = EngineConfig::from_env()?;
    tracing::info!(
        host = %database.host,
        database = %database.database,
        api_url = %engine.api_url,
        db_type = %engine.db_type,
        max_concurrent_runs = engine.max_concurrent_runs,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Check => {
            let pool = create_pool(&database).await?;
            let healthy = health_check(&pool).await;
            pool.close().await;
            if !healthy {
                bail!("database at {}:{} is not reachable", database.host, database.port);
            }
            tracing::info!("Database is reachable");
            Ok(())
        }
        Commands::Run { task_ids, date } => {
            let dispatcher = Dispatcher::new(database, engine)?;

            let results = tokio::select! {
                results = dispatcher.run_all(&task_ids, date) => results,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Shutdown signal received, abandoning runs");
                    bail!("interrupted");
                }
            };

            let mut failed = 0;
            for (task_id, result) in task_ids.iter().zip(results) {
                match result {
                    Ok(report) if report.succeeded => {
                        tracing::info!(task_id, run_id = %report.run_id, duration = report.duration, "Run succeeded");
                    }
                    Ok(report) => {
                        failed += 1;
                        tracing::error!(task_id, run_id = %report.run_id, error = ?report.error, "Run failed");
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::error!(task_id, error = %e, "Run could not start");
                    }
                }
            }

            if failed > 0 {
                bail!("{} of {} runs failed", failed, task_ids.len());
            }
            Ok(())
        }
    }
}
