//! Chunked, size-bounded mirror of the most recent records.
//!
//! ## Layout
//!
//! ```text
//! metaTimestamp   epoch milliseconds of the fetch that produced the mirror
//! metaCount       number of mirrored records
//! chunk_0         JSON array of records [0, 100)
//! chunk_100       JSON array of records [100, 200)
//! ...
//! ```
//!
//! Chunk keys are overwritten on every write. Keys past `metaCount` from an
//! older, larger generation are never read.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::KeyValueStore;
use crate::error::StorageResult;
use crate::models::WeatherRecord;

// ---

pub const META_TIMESTAMP_KEY: &str = "metaTimestamp";
pub const META_COUNT_KEY: &str = "metaCount";

pub const DEFAULT_MAX_RECORDS: usize = 1000;
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Key holding the chunk that starts at `offset`.
pub fn chunk_key(offset: usize) -> String {
    format!("chunk_{offset}")
}

/// Freshness information stored next to the chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorMetadata {
    pub written_at: DateTime<Utc>,
    pub count: usize,
}

/// Mirror of recent records over any [`KeyValueStore`].
pub struct FallbackStore<S> {
    store: S,
    max_records: usize,
    chunk_size: usize,
    // Writers are serialized; readers are not.
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> FallbackStore<S> {
    // ---
    pub fn new(store: S) -> Self {
        Self::with_limits(store, DEFAULT_MAX_RECORDS, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_limits(store: S, max_records: usize, chunk_size: usize) -> Self {
        Self {
            store,
            max_records,
            chunk_size: chunk_size.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// The underlying key/value backend.
    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Mirror the most recent `max_records` records.
    ///
    /// Each key is written atomically, the whole mirror is not. Metadata is
    /// written last so a reader never sees a count larger than the chunks
    /// that were actually written by this generation.
    pub async fn write(
        &self,
        records: &[WeatherRecord],
        written_at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        // ---
        let _guard = self.write_lock.lock().await;

        let recent = &records[records.len().saturating_sub(self.max_records)..];

        for (index, chunk) in recent.chunks(self.chunk_size).enumerate() {
            let json = serde_json::to_string(chunk)?;
            self.store.set(&chunk_key(index * self.chunk_size), &json).await?;
        }

        self.store
            .set(META_TIMESTAMP_KEY, &written_at.timestamp_millis().to_string())
            .await?;
        self.store
            .set(META_COUNT_KEY, &recent.len().to_string())
            .await?;

        tracing::debug!(
            count = recent.len(),
            chunks = recent.len().div_ceil(self.chunk_size),
            "Mirrored records to fallback store"
        );
        Ok(recent.len())
    }

    /// Record only the freshness timestamp, used after a failed write has
    /// cleared the store.
    pub async fn write_timestamp_only(&self, written_at: DateTime<Utc>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store
            .set(META_TIMESTAMP_KEY, &written_at.timestamp_millis().to_string())
            .await
    }

    pub async fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store.clear().await
    }

    /// Freshness of the current mirror, `None` if nothing was ever mirrored.
    pub async fn metadata(&self) -> StorageResult<Option<MirrorMetadata>> {
        // ---
        let Some(millis) = self.store.get(META_TIMESTAMP_KEY).await? else {
            return Ok(None);
        };
        let Some(written_at) = millis
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
        else {
            tracing::warn!(value = %millis, "Unreadable fallback timestamp");
            return Ok(None);
        };

        let count = self
            .store
            .get(META_COUNT_KEY)
            .await?
            .and_then(|c| c.trim().parse::<usize>().ok())
            .unwrap_or(0);

        Ok(Some(MirrorMetadata { written_at, count }))
    }

    /// Reconstruct the mirrored sequence.
    ///
    /// Chunks that are absent or unreadable are skipped, so the result may be
    /// a partial history. Any failure reading metadata yields an empty result.
    pub async fn read_all(&self) -> Vec<WeatherRecord> {
        // ---
        let meta = match self.metadata().await {
            Ok(Some(meta)) if meta.count > 0 => meta,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read fallback metadata: {}", e);
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(meta.count);
        for offset in (0..meta.count).step_by(self.chunk_size) {
            let key = chunk_key(offset);
            match self.store.get(&key).await {
                Ok(Some(json)) => match serde_json::from_str::<Vec<WeatherRecord>>(&json) {
                    Ok(chunk) => records.extend(chunk),
                    Err(e) => tracing::warn!(%key, "Skipping undecodable fallback chunk: {}", e),
                },
                Ok(None) => tracing::warn!(%key, "Fallback chunk missing"),
                Err(e) => tracing::warn!(%key, "Failed to read fallback chunk: {}", e),
            }
        }

        tracing::debug!(
            expected = meta.count,
            recovered = records.len(),
            "Read records from fallback store"
        );
        records
    }
}
