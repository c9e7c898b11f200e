use moka::{future::Cache, policy::EvictionPolicy};
use std::time::Duration;

/// Remote signature-check results keyed by the exact token string.
///
/// Bounded by capacity (LRU) and by time to live.
#[derive(Clone)]
pub struct VerifyCache {
    results: Cache<String, bool>,
}

impl VerifyCache {
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let results = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .time_to_live(ttl)
            .build();
        Self { results }
    }

    pub async fn get(&self, token: &str) -> Option<bool> {
        self.results.get(token).await
    }

    pub async fn insert(&self, token: &str, valid: bool) {
        self.results.insert(token.to_string(), valid).await;
    }

    pub async fn invalidate(&self, token: &str) {
        self.results.invalidate(token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire() {
        let cache = VerifyCache::new(10, Duration::from_millis(50));
        cache.insert("t", true).await;
        assert_eq!(cache.get("t").await, Some(true));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("t").await, None);
    }

    #[tokio::test]
    async fn invalidate_drops_entry() {
        let cache = VerifyCache::new(10, Duration::from_secs(60));
        cache.insert("t", false).await;
        cache.invalidate("t").await;
        assert_eq!(cache.get("t").await, None);
    }
}
