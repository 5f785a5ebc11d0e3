//! Application entry point for the `weatherflow` service.
//!
//! This binary orchestrates the startup sequence for the weather pipeline:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Selecting the fallback mirror backend (PostgreSQL when `DATABASE_URL`
//!   is set, process memory otherwise) and creating its schema
//! - Spawning the periodic feed refresh
//! - Mounting the query routes and serving requests
//!
//! # Environment Variables
//! - `FEED_URL` (optional) – weather feed URL
//! - `DATABASE_URL` (optional) – PostgreSQL connection string for the mirror
//! - `WEATHERFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `WEATHERFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`weatherflow::config`] for the full list.
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use weatherflow::config::{self, Config};
use weatherflow::fetcher::HttpFeed;
use weatherflow::pipeline::{spawn_refresh_timer, WeatherPipeline};
use weatherflow::routes;
use weatherflow::storage::{schema, MemoryStore, PgStore};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pipeline = Arc::new(build_pipeline(&cfg).await?);
    let _refresh = spawn_refresh_timer(Arc::clone(&pipeline), cfg.refresh_interval());

    let app: Router = routes::router(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the pipeline with the configured feed and mirror backend.
async fn build_pipeline(cfg: &Config) -> Result<WeatherPipeline> {
    // ---
    let feed = HttpFeed::new(cfg.feed_url.clone(), cfg.fetch_timeout())?;

    let Some(db_url) = cfg.db_url.as_deref() else {
        tracing::info!(
            quota_bytes = cfg.memory_store_quota_bytes,
            "Using in-memory fallback store"
        );
        let store = MemoryStore::with_quota(cfg.memory_store_quota_bytes);
        return Ok(WeatherPipeline::from_config(cfg, feed, store));
    };

    tracing::info!("Attempting to connect to fallback database");
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to fallback database: {}", e))?;
    tracing::info!("Successfully connected to fallback database");

    schema::create_schema(&pool).await?;
    Ok(WeatherPipeline::from_config(cfg, feed, PgStore::new(pool)))
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `WEATHERFLOW_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `WEATHERFLOW_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("WEATHERFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to WEATHERFLOW_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("WEATHERFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
