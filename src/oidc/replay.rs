//! CSRF and replay protection for the login handshake.
//!
//! Each login attempt stores a nonce and a salt. The state cookie carries
//! `base64url(json{state, redirectUrl, saltId})`; the provider receives
//! `HMAC-SHA256(salt, cookie)`. A callback passes only when the cookie, the hashed
//! state and an unused, fresh nonce all agree.

use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::random_token;
use crate::{store::ReplayStore, unix_now};

/// Nonces older than this are rejected.
pub const NONCE_VALIDITY_SECONDS: i64 = 600;

/// Lifetime of the state cookie.
pub const STATE_COOKIE_TTL_SECONDS: i64 = 3600;

/// Nonce and salt rows are kept this long so a late callback still reports
/// [`ReplayError::NonceExpired`] instead of an unknown nonce.
pub const RECORD_RETENTION_SECONDS: i64 = STATE_COOKIE_TTL_SECONDS + 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(&'static str),
    /// Recoverable: the user should simply start the login again.
    #[error("login attempt expired")]
    NonceExpired,
    #[error("replay store unavailable")]
    Store(#[source] anyhow::Error),
}

/// Payload of the state cookie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: String,
    #[serde(rename = "redirectUrl")]
    pub redirect_url: String,
    #[serde(rename = "saltId")]
    pub salt_id: Uuid,
}

impl StatePayload {
    /// Decode a state cookie value.
    ///
    /// # Errors
    /// Returns [`ReplayError::UnauthorizedClient`] if the value is not a state payload.
    pub fn decode(encoded: &str) -> Result<Self, ReplayError> {
        let bytes = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|_| ReplayError::UnauthorizedClient("state cookie is not base64"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| ReplayError::UnauthorizedClient("state cookie is not a state payload"))
    }

    fn encode(&self) -> Result<String, ReplayError> {
        let json = serde_json::to_vec(self)
            .context("failed to encode state")
            .map_err(ReplayError::Store)?;
        Ok(Base64UrlUnpadded::encode_string(&json))
    }
}

/// Values produced when a login attempt begins.
#[derive(Clone, Debug)]
pub struct LoginChallenge {
    pub nonce: String,
    /// Sent to the provider as `state`.
    pub hashed_state: String,
    /// Stored in the `state` cookie.
    pub state_cookie: String,
}

pub struct ReplayGuard {
    store: Arc<dyn ReplayStore>,
}

impl ReplayGuard {
    #[must_use]
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self { store }
    }

    /// Begin a login attempt that will return to `redirect_url`.
    ///
    /// # Errors
    /// Returns [`ReplayError::Store`] if the records cannot be persisted.
    pub async fn issue_login_challenge(
        &self,
        redirect_url: &str,
    ) -> Result<LoginChallenge, ReplayError> {
        let now = unix_now();
        let state = random_token().map_err(ReplayError::Store)?;
        let nonce = random_token().map_err(ReplayError::Store)?;
        let salt = random_token().map_err(ReplayError::Store)?;

        self.store
            .insert_nonce(&nonce, now)
            .await
            .map_err(ReplayError::Store)?;
        let salt_id = self
            .store
            .insert_salt(&salt, now)
            .await
            .map_err(ReplayError::Store)?;

        let state_cookie = StatePayload {
            state,
            redirect_url: redirect_url.to_string(),
            salt_id,
        }
        .encode()?;
        let hashed_state = keyed_hash(&state_cookie, &salt)?;

        Ok(LoginChallenge {
            nonce,
            hashed_state,
            state_cookie,
        })
    }

    /// Check a provider callback.
    ///
    /// The salt is consumed only when the hash matches; the nonce is consumed in
    /// every case.
    ///
    /// # Errors
    /// [`ReplayError::UnauthorizedClient`] when the state hash or nonce does not match,
    /// [`ReplayError::NonceExpired`] when both match but the nonce is stale.
    pub async fn verify_callback(
        &self,
        state_cookie: &str,
        query_state: &str,
        id_token_nonce: &str,
    ) -> Result<StatePayload, ReplayError> {
        let state_matches = self.state_matches(state_cookie, query_state).await?;

        let nonce = self
            .store
            .take_nonce(id_token_nonce)
            .await
            .map_err(ReplayError::Store)?;

        let now = unix_now();
        let (nonce_matches, nonce_fresh) = match &nonce {
            Some(record) => (
                bool::from(record.value.as_bytes().ct_eq(id_token_nonce.as_bytes())),
                record.created_at <= now && now - record.created_at <= NONCE_VALIDITY_SECONDS,
            ),
            None => (false, false),
        };

        let Some(payload) = state_matches else {
            warn!("login callback state does not match");
            return Err(ReplayError::UnauthorizedClient("state mismatch"));
        };
        if !nonce_matches {
            warn!("login callback nonce unknown or already used");
            return Err(ReplayError::UnauthorizedClient("nonce mismatch"));
        }
        if !nonce_fresh {
            debug!("login callback nonce expired");
            return Err(ReplayError::NonceExpired);
        }

        Ok(payload)
    }

    /// The decoded payload when the hash matches, with its salt consumed.
    async fn state_matches(
        &self,
        state_cookie: &str,
        query_state: &str,
    ) -> Result<Option<StatePayload>, ReplayError> {
        let Ok(payload) = StatePayload::decode(state_cookie) else {
            return Ok(None);
        };
        let Some(salt) = self
            .store
            .find_salt(payload.salt_id)
            .await
            .map_err(ReplayError::Store)?
        else {
            return Ok(None);
        };

        let expected = keyed_hash(state_cookie, &salt.value)?;
        if !bool::from(expected.as_bytes().ct_eq(query_state.as_bytes())) {
            return Ok(None);
        }

        // A concurrent callback may have consumed it first.
        let taken = self
            .store
            .take_salt(salt.id, &salt.value)
            .await
            .map_err(ReplayError::Store)?;
        Ok(taken.then_some(payload))
    }
}

fn keyed_hash(encoded_state: &str, salt: &str) -> Result<String, ReplayError> {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
        .map_err(|_| ReplayError::Store(anyhow::anyhow!("invalid salt")))?;
    mac.update(encoded_state.as_bytes());
    Ok(Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes()))
}
