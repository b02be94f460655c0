//! The Config Store (spec §4.A): a durable key/value mapping, split across a
//! `settings` table and a `secrets` table that share the same shape. Secret
//! values are wrapped in [`Secret`] so an accidental `{:?}` never prints a
//! bearer token.

use std::fmt;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;

const DEFAULT_INV_BASE: &str = "http://127.0.0.1:7912/api/v1";
const DEFAULT_CLOUD_BASE: &str = "https://api.cloud-filament.example";
const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_EPSILON_GRAMS: f64 = 0.5;
const MIN_SYNC_INTERVAL_SECONDS: u64 = 30;
const MIN_EPSILON_GRAMS: f64 = 0.01;

/// A secret value whose `Debug`/`Display` never reveal the contents — only
/// whether one is set. Use [`Secret::expose`] at the one call site that needs
/// the plaintext (building an Authorization header), never in a log line.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_set(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "Secret(<redacted>)")
        } else {
            write!(f, "Secret(<unset>)")
        }
    }
}

#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str, default: &str) -> Result<String> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v).unwrap_or_else(|| default.to_string()))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO settings(key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_secret(&self, key: &str) -> Result<Secret> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM secrets WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(Secret(row.map(|(v,)| v).unwrap_or_default()))
    }

    pub async fn set_secret(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO secrets(key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn inv_base(&self) -> Result<String> {
        self.get("INV_BASE", DEFAULT_INV_BASE).await
    }

    pub async fn cloud_base(&self) -> Result<String> {
        self.get("CLOUD_BASE", DEFAULT_CLOUD_BASE).await
    }

    pub async fn cloud_org_id(&self) -> Result<String> {
        self.get("CLOUD_ORG_ID", "").await
    }

    pub async fn cloud_token(&self) -> Result<Secret> {
        self.get_secret("CLOUD_TOKEN").await
    }

    /// Scheduler period, clamped to >= 30 seconds regardless of what was
    /// stored (a prior write from before the clamp existed, or a manual
    /// sqlite edit, shouldn't be able to busy-loop the scheduler).
    pub async fn sync_interval_seconds(&self) -> Result<u64> {
        let raw = self
            .get(
                "SYNC_INTERVAL_SECONDS",
                &DEFAULT_SYNC_INTERVAL_SECONDS.to_string(),
            )
            .await?;
        let parsed: u64 = raw.parse().unwrap_or(DEFAULT_SYNC_INTERVAL_SECONDS);
        Ok(parsed.max(MIN_SYNC_INTERVAL_SECONDS))
    }

    /// Minimum weight delta, in grams, that triggers an update; clamped to
    /// >= 0.01 so floating-point jitter can never cause per-tick churn.
    pub async fn epsilon_grams(&self) -> Result<f64> {
        let raw = self
            .get("EPSILON_GRAMS", &DEFAULT_EPSILON_GRAMS.to_string())
            .await?;
        let parsed: f64 = raw.parse().unwrap_or(DEFAULT_EPSILON_GRAMS);
        Ok(parsed.max(MIN_EPSILON_GRAMS))
    }

    pub async fn dry_run(&self) -> Result<bool> {
        Ok(self.get("DRY_RUN", "false").await? == "true")
    }

    pub async fn last_sync_time(&self) -> Result<i64> {
        let raw = self.get("LAST_SYNC_TIME", "0").await?;
        Ok(raw.parse().unwrap_or(0))
    }

    pub async fn set_last_sync_time(&self, unix_seconds: i64) -> Result<()> {
        self.set("LAST_SYNC_TIME", &unix_seconds.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> ConfigStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./db/migration/sqlite").run(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    #[tokio::test]
    async fn unset_keys_fall_back_to_defaults() {
        let store = memory_store().await;
        assert_eq!(store.sync_interval_seconds().await.unwrap(), 300);
        assert!((store.epsilon_grams().await.unwrap() - 0.5).abs() < 1e-9);
        assert!(!store.dry_run().await.unwrap());
    }

    #[tokio::test]
    async fn sync_interval_is_clamped_to_30() {
        let store = memory_store().await;
        store.set("SYNC_INTERVAL_SECONDS", "5").await.unwrap();
        assert_eq!(store.sync_interval_seconds().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn epsilon_is_clamped_to_001() {
        let store = memory_store().await;
        store.set("EPSILON_GRAMS", "0").await.unwrap();
        assert!((store.epsilon_grams().await.unwrap() - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn secrets_never_debug_print_the_value() {
        let store = memory_store().await;
        store.set_secret("CLOUD_TOKEN", "super-secret").await.unwrap();
        let secret = store.cloud_token().await.unwrap();
        assert_eq!(secret.expose(), "super-secret");
        assert!(!format!("{secret:?}").contains("super-secret"));
    }
}
