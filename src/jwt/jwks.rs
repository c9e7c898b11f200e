//! Published key sets and where to get them.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use reqwest::Client;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::{Instrument, info, info_span, warn};

use super::JwtError;

// Refresh on stale cache or unknown kid; keep the last good set when a refresh fails.
const JWKS_CACHE_TTL_SECONDS: u64 = 300;
const JWKS_REFRESH_COOLDOWN_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// A JSON Web Key. Only RSA keys can be turned into verifiers; other key types are carried along.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some(super::RS256.to_string()),
            key_use: Some("sig".to_string()),
            kid: Some(kid.into()),
            n: Some(Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be())),
            e: Some(Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be())),
        }
    }

    /// # Errors
    /// Returns an error if the key is not RSA or its modulus/exponent are invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, JwtError> {
        if self.kty != "RSA" {
            return Err(JwtError::KeyParse);
        }
        let (Some(n), Some(e)) = (&self.n, &self.e) else {
            return Err(JwtError::KeyParse);
        };
        let n_bytes = Base64UrlUnpadded::decode_vec(n).map_err(|_| JwtError::Base64)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(e).map_err(|_| JwtError::Base64)?;
        RsaPublicKey::new(
            BigUint::from_bytes_be(&n_bytes),
            BigUint::from_bytes_be(&e_bytes),
        )
        .map_err(JwtError::Rsa)
    }
}

/// Lookup of verification keys by `kid`.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn key(&self, kid: &str) -> Result<Option<Jwk>>;
}

/// Fixed key set, never refreshed.
#[derive(Debug, Clone)]
pub struct StaticJwks {
    jwks: Jwks,
}

impl StaticJwks {
    #[must_use]
    pub fn new(jwks: Jwks) -> Self {
        Self { jwks }
    }
}

#[async_trait]
impl KeySource for StaticJwks {
    async fn key(&self, kid: &str) -> Result<Option<Jwk>> {
        Ok(self.jwks.find_by_kid(kid).cloned())
    }
}

#[derive(Debug)]
struct JwksCache {
    jwks: Jwks,
    fetched_at: Option<Instant>,
}

impl JwksCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < Duration::from_secs(JWKS_CACHE_TTL_SECONDS))
    }
}

/// Key set fetched over HTTP and cached in memory.
#[derive(Debug)]
pub struct RemoteJwks {
    url: String,
    client: Client,
    cache: RwLock<JwksCache>,
    last_refresh_unix: AtomicU64,
}

impl RemoteJwks {
    /// The first fetch happens lazily on the first lookup.
    #[must_use]
    pub fn new(url: String, client: Client) -> Self {
        Self {
            url,
            client,
            cache: RwLock::new(JwksCache {
                jwks: Jwks::default(),
                fetched_at: None,
            }),
            last_refresh_unix: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn snapshot(&self) -> Jwks {
        let (cached, fresh) = {
            let cache = self.cache.read().await;
            (cache.jwks.clone(), cache.is_fresh())
        };

        if fresh {
            return cached;
        }

        match self.refresh().await {
            Ok(jwks) => jwks,
            Err(err) => {
                warn!(error = %err, url = %self.url, "failed to refresh jwks cache");
                cached
            }
        }
    }

    async fn refresh(&self) -> Result<Jwks> {
        self.last_refresh_unix
            .store(now_unix_seconds_u64(), Ordering::Relaxed);
        let jwks = fetch_jwks(&self.client, &self.url).await?;
        let mut cache = self.cache.write().await;
        cache.jwks = jwks.clone();
        cache.fetched_at = Some(Instant::now());
        info!(keys = jwks.keys.len(), url = %self.url, "jwks cache refreshed");
        Ok(jwks)
    }

    /// Refresh for an unknown `kid`, at most once per cooldown window.
    async fn refresh_on_unknown_kid(&self) -> Result<Option<Jwks>> {
        let now = now_unix_seconds_u64();
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < JWKS_REFRESH_COOLDOWN_SECONDS {
            return Ok(None);
        }
        self.refresh().await.map(Some)
    }
}

#[async_trait]
impl KeySource for RemoteJwks {
    async fn key(&self, kid: &str) -> Result<Option<Jwk>> {
        let jwks = self.snapshot().await;
        if let Some(jwk) = jwks.find_by_kid(kid) {
            return Ok(Some(jwk.clone()));
        }

        match self.refresh_on_unknown_kid().await? {
            Some(jwks) => Ok(jwks.find_by_kid(kid).cloned()),
            None => Ok(None),
        }
    }
}

fn now_unix_seconds_u64() -> u64 {
    u64::try_from(crate::unix_now()).unwrap_or(0)
}

async fn fetch_jwks(client: &Client, url: &str) -> Result<Jwks> {
    let span = info_span!("jwks.fetch", http.method = "GET", url = %url);
    async {
        let response = client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("jwks fetch failed: {status}"));
        }

        serde_json::from_str::<Jwks>(&body).context("Invalid JWKS JSON")
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::test_support::test_jwks;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_mixed_key_types() -> Result<()> {
        let jwks: Jwks = serde_json::from_value(json!({
            "keys": [
                { "kty": "EC", "crv": "P-256", "kid": "ec", "x": "a", "y": "b" },
                { "kty": "RSA", "kid": "rsa", "alg": "RS256", "n": "sXch", "e": "AQAB" }
            ]
        }))?;
        assert_eq!(jwks.keys.len(), 2);
        assert!(jwks.find_by_kid("ec").is_some_and(|k| k.to_rsa_public_key().is_err()));
        assert!(jwks.find_by_kid("missing").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn remote_jwks_caches_until_unknown_kid() -> Result<()> {
        let server = MockServer::start().await;
        let jwks = test_jwks("k1");

        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&jwks))
            .mount(&server)
            .await;

        let remote = RemoteJwks::new(
            format!("{}/.well-known/jwks.json", server.uri()),
            Client::new(),
        );

        assert!(remote.key("k1").await?.is_some());
        assert!(remote.key("k1").await?.is_some());
        // Unknown kid right after a fetch is inside the cooldown window.
        assert!(remote.key("k9").await?.is_none());

        let Some(requests) = server.received_requests().await else {
            anyhow::bail!("wiremock request recording is disabled");
        };
        assert_eq!(requests.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn remote_jwks_failure_yields_no_key() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let remote = RemoteJwks::new(server.uri(), Client::new());
        assert!(remote.key("k1").await?.is_none());
        Ok(())
    }
}
