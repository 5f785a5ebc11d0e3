//! Database schema management for the PostgreSQL fallback backend.
//!
//! Applied once on startup from `main.rs`, only when `DATABASE_URL` is set.

use sqlx::PgPool;

use crate::error::StorageResult;

// ---

/// Create the key/value table backing the fallback mirror (idempotent).
///
/// Safe to call on every startup; no-op if the table already exists.
pub async fn create_schema(pool: &PgPool) -> StorageResult<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fallback_kv (
            key        TEXT        PRIMARY KEY,
            value      TEXT        NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
