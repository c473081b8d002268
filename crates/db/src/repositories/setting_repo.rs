//! Repository for the `runtime_settings` key/value table.
//!
//! Settings are read at the moment of use, never cached, so operators can
//! flip the queue-mode toggle or adjust the max wait while runs are in
//! flight.

use sqlx::PgPool;

/// Provides typed access to live runtime settings.
pub struct SettingRepo;

impl SettingRepo {
    /// Fetch a raw setting value by key.
    pub async fn get(pool: &PgPool, key: &str) -> Result<Option<serde_json::Value>, sqlx::Error> {
        sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM runtime_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    /// Upsert a setting value.
    pub async fn set(
        pool: &PgPool,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO runtime_settings (key, value) \
             VALUES ($1, $2) \
             ON CONFLICT (key) \
             DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Boolean accessor; `default` when the key is missing or not a bool.
    pub async fn get_bool(pool: &PgPool, key: &str, default: bool) -> Result<bool, sqlx::Error> {
        let value = Self::get(pool, key).await?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(default))
    }

    /// Unsigned integer accessor; `None` when missing or not a number.
    pub async fn get_u64(pool: &PgPool, key: &str) -> Result<Option<u64>, sqlx::Error> {
        let value = Self::get(pool, key).await?;
        Ok(value.and_then(|v| v.as_u64()))
    }
}
