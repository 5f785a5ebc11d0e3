//! PostgreSQL key/value backend.

use async_trait::async_trait;
use sqlx::PgPool;

use super::KeyValueStore;
use crate::error::StorageResult;

/// Stores mirror keys as rows of `fallback_kv`.
///
/// The table must exist; see [`super::schema::create_schema`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        // ---
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM fallback_kv WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO fallback_kv (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET
                value      = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM fallback_kv").execute(&self.pool).await?;
        Ok(())
    }
}
