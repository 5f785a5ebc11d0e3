//! Feed retrieval with a freshness-bounded cache and a degraded fallback.
//!
//! ```text
//! Idle -> Fetching -> { Fresh | Degraded | Failed }
//!            ^            |
//!            +-- StaleButCached (cache older than the TTL)
//! ```
//!
//! Refreshes are single-flight: callers arriving while a retrieval is in
//! progress await the same shared future instead of issuing another request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::WeatherRecord;
use crate::parser::RecordParser;
use crate::storage::{FallbackStore, KeyValueStore};

// ---

/// How long a fetched snapshot is served without going back to the network.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Source of raw feed text.
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    async fn retrieve(&self) -> Result<String, FetchError>;
}

#[async_trait]
impl FeedSource for Box<dyn FeedSource> {
    async fn retrieve(&self) -> Result<String, FetchError> {
        (**self).retrieve().await
    }
}

/// Feed served over HTTP(S).
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpFeed {
    /// A hung request fails after `timeout` and is treated like any other
    /// transport error.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn retrieve(&self) -> Result<String, FetchError> {
        // ---
        tracing::debug!("Fetching weather feed from: {}", self.url);

        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        tracing::debug!(bytes = body.len(), "Weather feed received");
        Ok(body)
    }
}

/// Snapshot served to readers. Replaced wholesale, never mutated.
#[derive(Debug)]
pub struct CacheEntry {
    pub records: Arc<[WeatherRecord]>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Idle,
    Fetching,
    Fresh,
    StaleButCached,
    Degraded,
    Failed,
}

/// Where the records of a refresh came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Cache,
    Live,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Refresh {
    pub records: Arc<[WeatherRecord]>,
    pub source: RecordSource,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Refresh, FetchError>>>;

/// Owns the cache snapshot and the fallback mirror for one feed.
pub struct Fetcher<F, S> {
    inner: Arc<Inner<F, S>>,
}

impl<F, S> Clone for Fetcher<F, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<F, S> {
    source: F,
    parser: RecordParser,
    fallback: FallbackStore<S>,
    ttl: Duration,
    cache: RwLock<Option<Arc<CacheEntry>>>,
    in_flight: Mutex<Option<SharedRefresh>>,
    state: Mutex<FetchState>,
    force_refresh: AtomicBool,
}

impl<F, S> Fetcher<F, S>
where
    F: FeedSource,
    S: KeyValueStore + 'static,
{
    // ---
    pub fn new(
        source: F,
        parser: RecordParser,
        fallback: FallbackStore<S>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                parser,
                fallback,
                ttl,
                cache: RwLock::new(None),
                in_flight: Mutex::new(None),
                state: Mutex::new(FetchState::Idle),
                force_refresh: AtomicBool::new(false),
            }),
        }
    }

    /// Return the current record sequence, fetching only when the cache is
    /// stale or invalidated.
    pub async fn refresh(&self) -> Result<Arc<[WeatherRecord]>, FetchError> {
        self.refresh_detailed().await.map(|r| r.records)
    }

    /// Like [`Fetcher::refresh`], also reporting where the records came from.
    pub async fn refresh_detailed(&self) -> Result<Refresh, FetchError> {
        // ---
        let flight = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("Joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    // A finished flight updates the cache before clearing the
                    // slot, so this check sees its result.
                    if let Some(entry) = self.inner.fresh_entry() {
                        return Ok(Refresh {
                            records: Arc::clone(&entry.records),
                            source: RecordSource::Cache,
                        });
                    }

                    // Cleared as the flight starts, so an invalidation that
                    // lands mid-flight applies to the next refresh.
                    let forced = self.inner.force_refresh.swap(false, Ordering::SeqCst);
                    let inner = Arc::clone(&self.inner);
                    let flight = async move { inner.run_refresh(forced).await }.boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Force the next refresh to go to the network.
    pub fn invalidate(&self) {
        self.inner.force_refresh.store(true, Ordering::SeqCst);
    }

    /// Current cache snapshot without triggering a fetch.
    pub fn snapshot(&self) -> Option<Arc<CacheEntry>> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> FetchState {
        // ---
        let state = *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state == FetchState::Fresh && self.inner.fresh_entry().is_none() {
            return FetchState::StaleButCached;
        }
        state
    }

    pub fn fallback(&self) -> &FallbackStore<S> {
        &self.inner.fallback
    }
}

impl<F, S> Inner<F, S>
where
    F: FeedSource,
    S: KeyValueStore + 'static,
{
    fn fresh_entry(&self) -> Option<Arc<CacheEntry>> {
        // ---
        if self.force_refresh.load(Ordering::SeqCst) {
            return None;
        }
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .cloned()
    }

    fn set_state(&self, state: FetchState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn run_refresh(self: Arc<Self>, forced: bool) -> Result<Refresh, FetchError> {
        // ---
        self.set_state(FetchState::Fetching);

        // Freshness is measured from when the retrieval started.
        let started = Instant::now();
        let started_utc = Utc::now();

        let result = match self.fetch_live().await {
            Ok(records) => {
                let records: Arc<[WeatherRecord]> = records.into();

                let entry = Arc::new(CacheEntry {
                    records: Arc::clone(&records),
                    fetched_at: started,
                    fetched_at_utc: started_utc,
                });
                *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(entry);
                self.set_state(FetchState::Fresh);

                tracing::info!(count = records.len(), "Weather feed refreshed");
                self.mirror(&records, started_utc).await;

                Ok(Refresh {
                    records,
                    source: RecordSource::Live,
                })
            }
            Err(e) => {
                // The old snapshot is still stale for a forced refresh.
                if forced {
                    self.force_refresh.store(true, Ordering::SeqCst);
                }
                tracing::warn!("Live fetch failed, trying fallback store: {}", e);
                let stored = self.fallback.read_all().await;

                if stored.is_empty() {
                    tracing::error!("No weather data available: {}", e);
                    self.set_state(FetchState::Failed);
                    Err(e)
                } else {
                    tracing::warn!(count = stored.len(), "Serving records from fallback store");
                    self.set_state(FetchState::Degraded);
                    Ok(Refresh {
                        records: stored.into(),
                        source: RecordSource::Fallback,
                    })
                }
            }
        };

        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }

    async fn fetch_live(&self) -> Result<Vec<WeatherRecord>, FetchError> {
        let body = self.source.retrieve().await?;
        Ok(self.parser.parse(&body)?)
    }

    /// Best-effort mirror. On failure the store is cleared and only the
    /// freshness timestamp is kept, so it never holds two generations.
    async fn mirror(&self, records: &[WeatherRecord], fetched_at: DateTime<Utc>) {
        // ---
        let Err(e) = self.fallback.write(records, fetched_at).await else {
            return;
        };
        tracing::warn!("Failed to mirror records to fallback store: {}", e);

        if let Err(e) = self.fallback.clear().await {
            tracing::error!("Failed to clear fallback store: {}", e);
            return;
        }
        if let Err(e) = self.fallback.write_timestamp_only(fetched_at).await {
            tracing::error!("Failed to write fallback timestamp: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::storage::fallback::{META_COUNT_KEY, META_TIMESTAMP_KEY};
    use crate::storage::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    /// Feed double that counts retrievals and can be switched to fail.
    struct MockFeed {
        body: Mutex<Result<String, FetchError>>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl MockFeed {
        fn new(body: Result<String, FetchError>) -> (Self, Arc<AtomicUsize>) {
            // ---
            let calls = Arc::new(AtomicUsize::new(0));
            let feed = Self {
                body: Mutex::new(body),
                calls: Arc::clone(&calls),
                delay: Duration::ZERO,
            };
            (feed, calls)
        }
    }

    #[async_trait]
    impl FeedSource for MockFeed {
        async fn retrieve(&self) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.body.lock().unwrap().clone()
        }
    }

    fn feed_text(n: usize) -> String {
        // ---
        let mut text = String::from(concat!(
            "\"TOA5\",\"CR1000_2\"\n",
            "\"TIMESTAMP\",\"RECORD\",\"airtemp_Avg\"\n",
            "\"TS\",\"RN\",\"Deg C\"\n",
            "\"\",\"\",\"Avg\"\n",
        ));
        for i in 0..n {
            text.push_str(&format!(
                "\"2025-05-01 {:02}:{:02}:00\",{},20.5\n",
                (i * 2) / 60 % 24,
                (i * 2) % 60,
                i
            ));
        }
        text
    }

    fn create_fetcher(feed: MockFeed, store: MemoryStore) -> Fetcher<MockFeed, MemoryStore> {
        Fetcher::new(
            feed,
            RecordParser::default(),
            FallbackStore::new(store),
            DEFAULT_CACHE_TTL,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_skips_network() {
        // ---
        let (feed, calls) = MockFeed::new(Ok(feed_text(10)));
        let fetcher = create_fetcher(feed, MemoryStore::new());

        let first = fetcher.refresh_detailed().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let second = fetcher.refresh_detailed().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.source, RecordSource::Live);
        assert_eq!(second.source, RecordSource::Cache);
        assert!(Arc::ptr_eq(&first.records, &second.records));
        assert_eq!(fetcher.state(), FetchState::Fresh);

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(fetcher.state(), FetchState::StaleButCached);

        let third = fetcher.refresh_detailed().await.unwrap();
        assert_eq!(third.source, RecordSource::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_retrieval() {
        // ---
        let (mut feed, calls) = MockFeed::new(Ok(feed_text(10)));
        feed.delay = Duration::from_secs(3);
        let fetcher = create_fetcher(feed, MemoryStore::new());

        let (a, b) = tokio::join!(fetcher.refresh(), fetcher.refresh());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 10);
    }

    #[tokio::test]
    async fn test_invalidate_forces_retrieval() {
        // ---
        let (feed, calls) = MockFeed::new(Ok(feed_text(3)));
        let fetcher = create_fetcher(feed, MemoryStore::new());

        fetcher.refresh().await.unwrap();
        fetcher.invalidate();
        fetcher.refresh().await.unwrap();
        fetcher.refresh().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_measured_from_retrieval_start() {
        // ---
        let (mut feed, calls) = MockFeed::new(Ok(feed_text(5)));
        feed.delay = Duration::from_secs(2);
        let fetcher = create_fetcher(feed, MemoryStore::new());

        fetcher.refresh().await.unwrap();

        // Five minutes after the first retrieval began, not after it ended
        tokio::time::advance(DEFAULT_CACHE_TTL - Duration::from_secs(2)).await;
        assert_eq!(fetcher.state(), FetchState::StaleButCached);

        let refresh = fetcher.refresh_detailed().await.unwrap();
        assert_eq!(refresh.source, RecordSource::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_flight_is_kept() {
        // ---
        let (mut feed, calls) = MockFeed::new(Ok(feed_text(3)));
        feed.delay = Duration::from_secs(3);
        let fetcher = create_fetcher(feed, MemoryStore::new());

        let pending = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.refresh().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        fetcher.invalidate();
        pending.await.unwrap().unwrap();

        let refresh = fetcher.refresh_detailed().await.unwrap();
        assert_eq!(refresh.source, RecordSource::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_forced_refresh_stays_forced() {
        // ---
        let (feed, calls) = MockFeed::new(Ok(feed_text(3)));
        let fetcher = create_fetcher(feed, MemoryStore::new());
        let feed = &fetcher.inner.source;

        fetcher.refresh().await.unwrap();
        *feed.body.lock().unwrap() = Err(FetchError::Status(502));
        fetcher.invalidate();
        let degraded = fetcher.refresh_detailed().await.unwrap();
        assert_eq!(degraded.source, RecordSource::Fallback);

        *feed.body.lock().unwrap() = Ok(feed_text(4));
        assert_eq!(fetcher.refresh().await.unwrap().len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_successful_fetch_is_mirrored() {
        // ---
        let (feed, _) = MockFeed::new(Ok(feed_text(150)));
        let store = MemoryStore::new();
        let fetcher = create_fetcher(feed, store.clone());

        let records = fetcher.refresh().await.unwrap();

        assert_eq!(store.get(META_COUNT_KEY).await.unwrap().as_deref(), Some("150"));
        assert_eq!(fetcher.fallback().read_all().await, records.to_vec());
        assert!(fetcher.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_mirror() {
        // ---
        let store = MemoryStore::new();
        let seeded: Vec<WeatherRecord> = RecordParser::default().parse(&feed_text(500)).unwrap();
        FallbackStore::new(store.clone())
            .write(&seeded, Utc::now())
            .await
            .unwrap();

        let (feed, calls) = MockFeed::new(Err(FetchError::Transport("connection refused".into())));
        let fetcher = create_fetcher(feed, store);

        let refresh = fetcher.refresh_detailed().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.source, RecordSource::Fallback);
        assert_eq!(refresh.records.len(), 500);
        assert_eq!(refresh.records.to_vec(), seeded);
        assert_eq!(fetcher.state(), FetchState::Degraded);
        assert!(fetcher.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_falls_back_to_mirror() {
        // ---
        let store = MemoryStore::new();
        let seeded = RecordParser::default().parse(&feed_text(20)).unwrap();
        FallbackStore::new(store.clone())
            .write(&seeded, Utc::now())
            .await
            .unwrap();

        let (feed, _) = MockFeed::new(Ok("<html>rate limited</html>".to_string()));
        let fetcher = create_fetcher(feed, store);

        assert_eq!(fetcher.refresh().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_total_failure_propagates_fetch_error() {
        // ---
        let (feed, _) = MockFeed::new(Err(FetchError::Status(503)));
        let fetcher = create_fetcher(feed, MemoryStore::new());

        let err = fetcher.refresh().await.unwrap_err();

        assert!(matches!(err, FetchError::Status(503)));
        assert_eq!(fetcher.state(), FetchState::Failed);
    }

    #[tokio::test]
    async fn test_mirror_failure_clears_and_keeps_timestamp() {
        // ---
        let store = MemoryStore::with_quota(4_096);
        store.set("chunk_0", "[]").await.unwrap();
        store.set("metaCount", "1").await.unwrap();

        let (feed, _) = MockFeed::new(Ok(feed_text(300)));
        let fetcher = create_fetcher(feed, store.clone());

        let records = fetcher.refresh().await.unwrap();

        assert_eq!(records.len(), 300);
        assert_eq!(store.len(), 1);
        assert!(store.get(META_TIMESTAMP_KEY).await.unwrap().is_some());
        assert!(fetcher.fallback().read_all().await.is_empty());
    }
}
