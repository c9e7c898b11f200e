//! Single-use nonce and salt records for the login handshake.
//!
//! Records are shared by every instance through the database. Consumption is a
//! single `DELETE .. RETURNING` so two concurrent callbacks carrying the same
//! values cannot both observe the record.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonceRecord {
    pub value: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaltRecord {
    pub id: Uuid,
    pub value: String,
    pub created_at: i64,
}

#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn insert_nonce(&self, value: &str, created_at: i64) -> Result<()>;

    /// Delete the nonce and return it if it existed.
    async fn take_nonce(&self, value: &str) -> Result<Option<NonceRecord>>;

    async fn insert_salt(&self, value: &str, created_at: i64) -> Result<Uuid>;

    async fn find_salt(&self, id: Uuid) -> Result<Option<SaltRecord>>;

    /// Delete the salt only if both `id` and `value` match; true when a row was removed.
    async fn take_salt(&self, id: Uuid, value: &str) -> Result<bool>;

    /// Remove nonce and salt records created before `cutoff`.
    async fn purge_created_before(&self, cutoff: i64) -> Result<u64>;
}

pub struct PgReplayStore {
    pool: PgPool,
}

impl PgReplayStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReplayStore for PgReplayStore {
    async fn insert_nonce(&self, value: &str, created_at: i64) -> Result<()> {
        let query = "INSERT INTO login_nonces (value, created_at) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(value)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert nonce")?;
        Ok(())
    }

    async fn take_nonce(&self, value: &str) -> Result<Option<NonceRecord>> {
        let query = "DELETE FROM login_nonces WHERE value = $1 RETURNING value, created_at";
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to consume nonce")?;

        Ok(row.map(|row| NonceRecord {
            value: row.get("value"),
            created_at: row.get("created_at"),
        }))
    }

    async fn insert_salt(&self, value: &str, created_at: i64) -> Result<Uuid> {
        let query = "INSERT INTO login_salts (id, value, created_at) VALUES ($1, $2, $3)";
        let id = Uuid::new_v4();
        sqlx::query(query)
            .bind(id)
            .bind(value)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert salt")?;
        Ok(id)
    }

    async fn find_salt(&self, id: Uuid) -> Result<Option<SaltRecord>> {
        let query = "SELECT id, value, created_at FROM login_salts WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup salt")?;

        Ok(row.map(|row| SaltRecord {
            id: row.get("id"),
            value: row.get("value"),
            created_at: row.get("created_at"),
        }))
    }

    async fn take_salt(&self, id: Uuid, value: &str) -> Result<bool> {
        let query = "DELETE FROM login_salts WHERE id = $1 AND value = $2 RETURNING id";
        let row = sqlx::query(query)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to consume salt")?;
        Ok(row.is_some())
    }

    async fn purge_created_before(&self, cutoff: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("begin replay purge")?;

        let query = "DELETE FROM login_nonces WHERE created_at < $1";
        let nonces = sqlx::query(query)
            .bind(cutoff)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge nonces")?;

        let query = "DELETE FROM login_salts WHERE created_at < $1";
        let salts = sqlx::query(query)
            .bind(cutoff)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge salts")?;

        tx.commit().await.context("commit replay purge")?;

        Ok(nonces.rows_affected() + salts.rows_affected())
    }
}

#[derive(Default)]
pub struct InMemoryReplayStore {
    nonces: Mutex<HashMap<String, i64>>,
    salts: Mutex<HashMap<Uuid, SaltRecord>>,
}

impl InMemoryReplayStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn insert_nonce(&self, value: &str, created_at: i64) -> Result<()> {
        self.nonces
            .lock()
            .await
            .insert(value.to_string(), created_at);
        Ok(())
    }

    async fn take_nonce(&self, value: &str) -> Result<Option<NonceRecord>> {
        Ok(self
            .nonces
            .lock()
            .await
            .remove(value)
            .map(|created_at| NonceRecord {
                value: value.to_string(),
                created_at,
            }))
    }

    async fn insert_salt(&self, value: &str, created_at: i64) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.salts.lock().await.insert(
            id,
            SaltRecord {
                id,
                value: value.to_string(),
                created_at,
            },
        );
        Ok(id)
    }

    async fn find_salt(&self, id: Uuid) -> Result<Option<SaltRecord>> {
        Ok(self.salts.lock().await.get(&id).cloned())
    }

    async fn take_salt(&self, id: Uuid, value: &str) -> Result<bool> {
        let mut salts = self.salts.lock().await;
        if salts.get(&id).is_some_and(|salt| salt.value == value) {
            salts.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn purge_created_before(&self, cutoff: i64) -> Result<u64> {
        let mut nonces = self.nonces.lock().await;
        let mut salts = self.salts.lock().await;
        let before = nonces.len() + salts.len();
        nonces.retain(|_, created_at| *created_at >= cutoff);
        salts.retain(|_, salt| salt.created_at >= cutoff);
        Ok((before - nonces.len() - salts.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonce_is_single_use() -> Result<()> {
        let store = InMemoryReplayStore::new();
        store.insert_nonce("n1", 10).await?;
        assert_eq!(
            store.take_nonce("n1").await?,
            Some(NonceRecord {
                value: "n1".to_string(),
                created_at: 10
            })
        );
        assert_eq!(store.take_nonce("n1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn salt_is_only_taken_with_matching_value() -> Result<()> {
        let store = InMemoryReplayStore::new();
        let id = store.insert_salt("secret", 10).await?;
        assert!(!store.take_salt(id, "guess").await?);
        assert!(store.find_salt(id).await?.is_some());
        assert!(store.take_salt(id, "secret").await?);
        assert!(store.find_salt(id).await?.is_none());
        assert!(!store.take_salt(id, "secret").await?);
        Ok(())
    }

    #[tokio::test]
    async fn purge_drops_old_records() -> Result<()> {
        let store = InMemoryReplayStore::new();
        store.insert_nonce("old", 10).await?;
        store.insert_nonce("new", 100).await?;
        store.insert_salt("old", 10).await?;
        assert_eq!(store.purge_created_before(50).await?, 2);
        assert_eq!(store.purge_created_before(50).await?, 0);
        assert!(store.take_nonce("new").await?.is_some());
        Ok(())
    }
}
