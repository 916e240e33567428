//! kritikos-analysis - IDP/PAR analysis service
//!
//! Runs the proposal analysis pipeline (fetch, summarize, triviality filter,
//! PAR rubric), recomputes the legislator index (IDP) and serves both over
//! HTTP + SSE. Every operation is also available as a one-shot subcommand.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kritikos_common::config::TomlConfig;
use kritikos_common::events::EventBus;
use sqlx::SqlitePool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kritikos_analysis::config::{resolve_llm_api_key, ServiceConfig};
use kritikos_analysis::models::{AnalysisRun, RunParameters, RunState};
use kritikos_analysis::scoring::aggregator::{recompute_all, RecomputeOptions};
use kritikos_analysis::scoring::Methodology;
use kritikos_analysis::workflow::BatchDriver;
use kritikos_analysis::AppState;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5730;
const DEFAULT_LOG_FILTER: &str = "kritikos_analysis=info,kritikos_common=info";
const EVENT_BUS_CAPACITY: usize = 256;
const RUN_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Command-line arguments for kritikos-analysis
#[derive(Parser, Debug)]
#[command(name = "kritikos-analysis")]
#[command(about = "IDP/PAR analysis pipeline for Chamber of Deputies proposals")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true, env = "KRITIKOS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "KRITIKOS_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "KRITIKOS_PORT")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a batch analysis
    Analyze {
        /// Proposals per lot
        #[arg(long)]
        lot_size: Option<usize>,

        /// Stop after this many lots (0 = until no work remains)
        #[arg(long)]
        max_lots: Option<usize>,

        /// Keep taking lots until no work remains
        #[arg(long)]
        continuous: bool,
    },

    /// Analyze a single proposal
    AnalyzeOne {
        /// Proposal id
        #[arg(long)]
        id: i64,

        /// Redo a current analysis
        #[arg(long)]
        force: bool,
    },

    /// Recompute the legislator index
    ComputeIdp {
        /// Methodology version (1.0 or 2.0)
        #[arg(long, default_value = "1.0")]
        methodology: Methodology,

        /// Only count data of this year
        #[arg(long)]
        year: Option<i64>,
    },

    /// Print the analysis report as JSON
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = kritikos_common::config::resolve_config_path(args.config.as_deref());
    let toml_config = kritikos_common::config::load_or_default(config_path.as_deref())
        .context("Failed to load configuration file")?;

    init_tracing(&toml_config);

    info!("Starting kritikos-analysis");
    info!(
        "Version: {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if let Some(path) = &config_path {
        info!("Configuration file: {}", path.display());
    }

    let db_path = kritikos_common::config::resolve_database_path(args.database.as_deref(), &toml_config);
    info!("Database: {}", db_path.display());
    let db_pool = kritikos_analysis::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let service_config = ServiceConfig::resolve(&db_pool, &toml_config)
        .await
        .context("Failed to resolve configuration")?;
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    match args.command {
        Command::Serve { port, bind } => {
            serve(db_pool, &toml_config, service_config, event_bus, port, bind).await
        }
        Command::Analyze {
            lot_size,
            max_lots,
            continuous,
        } => {
            let driver = build_driver(&db_pool, &toml_config, &service_config, event_bus).await?;
            let parameters = RunParameters {
                lot_size: lot_size.unwrap_or(service_config.pipeline.lot_size).max(1),
                max_lots: match max_lots {
                    Some(0) => None,
                    Some(n) => Some(n),
                    None => service_config.pipeline.max_lots,
                },
                continuous,
            };
            analyze(&db_pool, &driver, parameters).await
        }
        Command::AnalyzeOne { id, force } => {
            let driver = build_driver(&db_pool, &toml_config, &service_config, event_bus).await?;
            let outcome = driver.analyze_one(id, force).await?;
            let analysis = kritikos_analysis::db::analyses::load_analysis(&db_pool, id).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            match outcome.error {
                Some(e) => anyhow::bail!("Proposal {} failed: {}", id, e),
                None => Ok(()),
            }
        }
        Command::ComputeIdp { methodology, year } => {
            let options = RecomputeOptions {
                methodology,
                reference_year: year,
            };
            let summary = recompute_all(
                &db_pool,
                options,
                service_config.pipeline.max_lock_wait_ms,
                Some(&event_bus),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Report => {
            let report = kritikos_analysis::db::report::build_report(&db_pool).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// RUST_LOG wins, then the `[logging] filter` setting, then the default
fn init_tracing(toml_config: &TomlConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = toml_config
            .logging
            .filter
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        tracing_subscriber::EnvFilter::new(directive)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_driver(
    db_pool: &SqlitePool,
    toml_config: &TomlConfig,
    service_config: &ServiceConfig,
    event_bus: EventBus,
) -> Result<BatchDriver> {
    let api_key = resolve_llm_api_key(db_pool, toml_config).await?;
    let driver = kritikos_analysis::build_batch_driver(db_pool.clone(), service_config, api_key, event_bus)?;
    info!(model = %service_config.llm.model, "LLM client initialized");
    Ok(driver)
}

async fn serve(
    db_pool: SqlitePool,
    toml_config: &TomlConfig,
    service_config: ServiceConfig,
    event_bus: EventBus,
    port: Option<u16>,
    bind: Option<String>,
) -> Result<()> {
    let orphaned = kritikos_analysis::db::runs::fail_orphaned_runs(&db_pool).await?;
    if orphaned > 0 {
        warn!("Marked {} interrupted analysis run(s) as FAILED", orphaned);
    }

    let mut state = AppState::new(db_pool.clone(), event_bus.clone(), service_config.clone());
    match build_driver(&db_pool, toml_config, &service_config, event_bus).await {
        Ok(driver) => state = state.with_driver(Arc::new(driver)),
        Err(e) => {
            warn!("Analysis disabled: {}", e);
            state.set_last_error(e.to_string()).await;
        }
    }

    let app = kritikos_analysis::build_router(state.clone());

    let bind = bind
        .or_else(|| toml_config.bind_address.clone())
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
    let port = port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop runs still in flight and let them record CANCELLED
    let unfinished = state.shutdown_runs(RUN_SHUTDOWN_GRACE).await;
    if unfinished > 0 {
        warn!("{} analysis run(s) did not stop before shutdown", unfinished);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn analyze(db_pool: &SqlitePool, driver: &BatchDriver, parameters: RunParameters) -> Result<()> {
    if kritikos_analysis::db::runs::has_running_run(db_pool).await? {
        anyhow::bail!("An analysis run is already running (runs left by a crash are cleared when `serve` starts)");
    }

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let run = driver.execute(AnalysisRun::new(parameters), cancel_token).await;

    println!("Run {}: {}", run.run_id, run.state.as_str());
    println!("{}", run.statistics.display_string());
    if let Some(average) = run.statistics.par.average() {
        println!(
            "PAR average {:.2} (min {:.2}, max {:.2})",
            average,
            run.statistics.par.min.unwrap_or_default(),
            run.statistics.par.max.unwrap_or_default()
        );
    }
    if let Some(per_item) = run.statistics.average_seconds_per_item() {
        println!("{:.1}s total, {:.1}s per item", run.statistics.duration_seconds, per_item);
    }

    if run.state == RunState::Failed {
        let message = run.last_error.unwrap_or_else(|| "unknown error".to_string());
        error!("Analysis run failed: {}", message);
        anyhow::bail!("Analysis run failed: {}", message);
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
