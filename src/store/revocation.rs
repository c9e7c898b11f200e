//! Revoked session tokens.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;

use super::db_span;

/// Hash a token so raw values never touch the database.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `token` as revoked until `expires_at` (unix seconds).
    async fn add(&self, token: &str, expires_at: i64) -> Result<()>;

    async fn exists(&self, token: &str) -> Result<bool>;

    /// Delete records whose `expires_at` is before `now`; returns the count removed.
    async fn purge_expired(&self, now: i64) -> Result<u64>;
}

pub struct PgRevocationStore {
    pool: PgPool,
}

impl PgRevocationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn add(&self, token: &str, expires_at: i64) -> Result<()> {
        let query = r"
            INSERT INTO revoked_tokens (token_hash, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (token_hash) DO NOTHING
        ";
        sqlx::query(query)
            .bind(hash_token(token))
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert revoked token")?;
        Ok(())
    }

    async fn exists(&self, token: &str) -> Result<bool> {
        let query = "SELECT 1 FROM revoked_tokens WHERE token_hash = $1";
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup revoked token")?;
        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let query = "DELETE FROM revoked_tokens WHERE expires_at < $1";
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to purge revoked tokens")?;
        Ok(result.rows_affected())
    }
}

#[derive(Default)]
pub struct InMemoryRevocationStore {
    revoked: Mutex<HashMap<Vec<u8>, i64>>,
}

impl InMemoryRevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn add(&self, token: &str, expires_at: i64) -> Result<()> {
        self.revoked
            .lock()
            .await
            .entry(hash_token(token))
            .or_insert(expires_at);
        Ok(())
    }

    async fn exists(&self, token: &str) -> Result<bool> {
        Ok(self.revoked.lock().await.contains_key(&hash_token(token)))
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let mut revoked = self.revoked.lock().await;
        let before = revoked.len();
        revoked.retain(|_, expires_at| *expires_at >= now);
        Ok((before - revoked.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_removes_only_expired_and_is_idempotent() -> Result<()> {
        let store = InMemoryRevocationStore::new();
        store.add("expired", 100).await?;
        store.add("live", 300).await?;

        assert_eq!(store.purge_expired(200).await?, 1);
        assert_eq!(store.purge_expired(200).await?, 0);
        assert!(!store.exists("expired").await?);
        assert!(store.exists("live").await?);
        Ok(())
    }

    #[tokio::test]
    async fn add_is_idempotent() -> Result<()> {
        let store = InMemoryRevocationStore::new();
        store.add("token", 100).await?;
        store.add("token", 500).await?;
        assert!(store.exists("token").await?);
        // The first expiry wins, like ON CONFLICT DO NOTHING.
        assert_eq!(store.purge_expired(101).await?, 1);
        Ok(())
    }

    #[test]
    fn hash_token_is_stable() {
        assert_eq!(hash_token("a"), hash_token("a"));
        assert_ne!(hash_token("a"), hash_token("b"));
        assert_eq!(hash_token("a").len(), 32);
    }
}
