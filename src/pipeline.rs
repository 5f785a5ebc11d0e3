//! The query interface consumed by collaborators, plus the refresh timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::anomaly::{AnomalyEngine, Thresholds};
use crate::config::Config;
use crate::error::FetchError;
use crate::fetcher::{FeedSource, Fetcher};
use crate::models::{Anomaly, RangeTag, WeatherRecord};
use crate::parser::RecordParser;
use crate::storage::{FallbackStore, KeyValueStore};
use crate::window;

// ---

/// Fetcher with its feed and mirror backend erased, as held by the pipeline.
pub type DynFetcher = Fetcher<Box<dyn FeedSource>, Arc<dyn KeyValueStore>>;

/// One logical pipeline instance: a single fetcher plus the anomaly engine.
pub struct WeatherPipeline {
    fetcher: DynFetcher,
    engine: AnomalyEngine,
}

impl WeatherPipeline {
    // ---
    pub fn new(fetcher: DynFetcher, engine: AnomalyEngine) -> Self {
        Self { fetcher, engine }
    }

    /// Wire a pipeline from configuration.
    pub fn from_config(
        config: &Config,
        source: impl FeedSource,
        store: impl KeyValueStore + 'static,
    ) -> Self {
        // ---
        let store: Arc<dyn KeyValueStore> = Arc::new(store);
        let fallback =
            FallbackStore::with_limits(store, config.mirror_max_records, config.mirror_chunk_size);
        let fetcher = Fetcher::new(
            Box::new(source) as Box<dyn FeedSource>,
            RecordParser::with_offset_minutes(config.feed_utc_offset_minutes),
            fallback,
            config.cache_ttl(),
        );

        Self::new(fetcher, AnomalyEngine::new(&Thresholds::default()))
    }

    pub fn fetcher(&self) -> &DynFetcher {
        &self.fetcher
    }

    /// Records inside `range`, measured back from the current instant.
    pub async fn get_records(&self, range: RangeTag) -> Result<Vec<WeatherRecord>, FetchError> {
        self.get_records_at(range, Utc::now()).await
    }

    pub async fn get_records_at(
        &self,
        range: RangeTag,
        now: DateTime<Utc>,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        // ---
        let records = self.fetcher.refresh().await?;
        let windowed = window::window(&records, range, now);

        tracing::debug!(
            %range,
            total = records.len(),
            windowed = windowed.len(),
            "Selected records for range"
        );
        Ok(windowed)
    }

    pub fn get_anomalies(&self, records: &[WeatherRecord]) -> Vec<Anomaly> {
        self.engine.detect(records)
    }

    /// Anomalies across every fetched record, regardless of range.
    pub async fn get_anomaly_history(&self) -> Result<Vec<Anomaly>, FetchError> {
        // ---
        let records = self.fetcher.refresh().await?;
        let anomalies = self.engine.detect(&records);

        tracing::debug!(
            total = records.len(),
            anomalies = anomalies.len(),
            "Scanned full record history"
        );
        Ok(anomalies)
    }
}

/// Refresh the pipeline every `period`, starting immediately.
///
/// Failures are logged; the task runs until aborted.
pub fn spawn_refresh_timer(pipeline: Arc<WeatherPipeline>, period: Duration) -> JoinHandle<()> {
    // ---
    tracing::info!("Starting refresh timer (interval: {:?})", period);

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            match pipeline.fetcher().refresh_detailed().await {
                Ok(refresh) => tracing::debug!(
                    count = refresh.records.len(),
                    source = ?refresh.source,
                    "Scheduled refresh complete"
                ),
                Err(e) => tracing::error!("Scheduled refresh failed: {}", e),
            }
        }
    })
}
