//! Configuration loader for the `weatherflow` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Feed published by the CR1000 logger, one-minute table.
pub const DEFAULT_FEED_URL: &str =
    "https://raw.githubusercontent.com/JackQuark/2025CloudDymWorkshop/cr1000/CR1000_2_Data1min.dat";

/// Parse an optional environment variable of the given type with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// URL of the delimited weather feed.
    pub feed_url: String,

    /// PostgreSQL connection string for the fallback mirror. When unset the
    /// mirror lives in process memory.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// How long a fetched snapshot is served without refetching.
    pub cache_ttl_secs: u64,

    /// Period of the background refresh timer.
    pub refresh_interval_secs: u64,

    /// Transport timeout for a single feed retrieval.
    pub fetch_timeout_secs: u64,

    /// Number of most recent records kept in the fallback mirror.
    pub mirror_max_records: usize,

    /// Records per mirror chunk.
    pub mirror_chunk_size: usize,

    /// Byte quota of the in-memory mirror backend.
    pub memory_store_quota_bytes: usize,

    /// Offset of the logger clock, in minutes east of UTC.
    pub feed_utc_offset_minutes: i32,

    /// HTTP listen port.
    pub listen_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            db_url: None,
            db_pool_max: 5,
            cache_ttl_secs: 300,
            refresh_interval_secs: 300,
            fetch_timeout_secs: 30,
            mirror_max_records: 1000,
            mirror_chunk_size: 100,
            memory_store_quota_bytes: 5 * 1024 * 1024,
            feed_utc_offset_minutes: 0,
            listen_port: 8080,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `FEED_URL` – weather feed URL (default: the CR1000 one-minute table)
/// - `DATABASE_URL` – PostgreSQL connection string for the fallback mirror
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `CACHE_TTL_SECS` – cache freshness window (default: 300)
/// - `REFRESH_INTERVAL_SECS` – background refresh period (default: 300)
/// - `FETCH_TIMEOUT_SECS` – feed request timeout (default: 30)
/// - `MIRROR_MAX_RECORDS` – records kept in the mirror (default: 1000)
/// - `MIRROR_CHUNK_SIZE` – records per mirror chunk (default: 100)
/// - `MEMORY_STORE_QUOTA_BYTES` – in-memory mirror quota (default: 5 MiB)
/// - `FEED_UTC_OFFSET_MINUTES` – logger clock offset (default: 0)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = Config::default();

    let feed_url = env::var("FEED_URL").unwrap_or(defaults.feed_url);
    let db_url = env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, defaults.db_pool_max);
    let cache_ttl_secs = parse_env!("CACHE_TTL_SECS", u64, defaults.cache_ttl_secs);
    let refresh_interval_secs =
        parse_env!("REFRESH_INTERVAL_SECS", u64, defaults.refresh_interval_secs);
    let fetch_timeout_secs = parse_env!("FETCH_TIMEOUT_SECS", u64, defaults.fetch_timeout_secs);
    let mirror_max_records = parse_env!("MIRROR_MAX_RECORDS", usize, defaults.mirror_max_records);
    let mirror_chunk_size = parse_env!("MIRROR_CHUNK_SIZE", usize, defaults.mirror_chunk_size);
    let memory_store_quota_bytes = parse_env!(
        "MEMORY_STORE_QUOTA_BYTES",
        usize,
        defaults.memory_store_quota_bytes
    );
    let feed_utc_offset_minutes = parse_env!(
        "FEED_UTC_OFFSET_MINUTES",
        i32,
        defaults.feed_utc_offset_minutes
    );
    let listen_port = parse_env!("LISTEN_PORT", u16, defaults.listen_port);

    if mirror_chunk_size == 0 {
        return Err(anyhow!("MIRROR_CHUNK_SIZE must be greater than zero"));
    }
    if refresh_interval_secs == 0 {
        return Err(anyhow!("REFRESH_INTERVAL_SECS must be greater than zero"));
    }

    Ok(Config {
        feed_url,
        db_url,
        db_pool_max,
        cache_ttl_secs,
        refresh_interval_secs,
        fetch_timeout_secs,
        mirror_max_records,
        mirror_chunk_size,
        memory_store_quota_bytes,
        feed_utc_offset_minutes,
        listen_port,
    })
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing all configuration values
    /// that were loaded.
    pub fn log_config(&self) {
        // ---
        let db_url = self
            .db_url
            .as_deref()
            .map(mask_db_url)
            .unwrap_or_else(|| "(unset, in-memory mirror)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  FEED_URL                 : {}", self.feed_url);
        tracing::info!("  DATABASE_URL             : {}", db_url);
        tracing::info!("  DB_POOL_MAX              : {}", self.db_pool_max);
        tracing::info!("  CACHE_TTL_SECS           : {}", self.cache_ttl_secs);
        tracing::info!("  REFRESH_INTERVAL_SECS    : {}", self.refresh_interval_secs);
        tracing::info!("  FETCH_TIMEOUT_SECS       : {}", self.fetch_timeout_secs);
        tracing::info!("  MIRROR_MAX_RECORDS       : {}", self.mirror_max_records);
        tracing::info!("  MIRROR_CHUNK_SIZE        : {}", self.mirror_chunk_size);
        tracing::info!("  MEMORY_STORE_QUOTA_BYTES : {}", self.memory_store_quota_bytes);
        tracing::info!("  FEED_UTC_OFFSET_MINUTES  : {}", self.feed_utc_offset_minutes);
        tracing::info!("  LISTEN_PORT              : {}", self.listen_port);
    }
}

/// Replace the password in a connection URL with `****`.
fn mask_db_url(url: &str) -> String {
    // ---
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // `postgres://host@...` has its only colon in the scheme
            let prefix = &url[..colon_pos];
            if !prefix.ends_with("postgres") && !prefix.ends_with("postgresql") {
                return format!("{}:****{}", prefix, &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
