//! Session token issuance, verification and revocation.
//!
//! A session token is `base64url(header).base64url(claims).base64url(signature)`.
//! The signature covers the ASCII bytes of `header "." claims` and is produced by a
//! [`TokenSigner`]; the header `kid` is `<key_name>:v<N>` so verification targets the
//! key version that signed it.

mod cache;
mod claims;
pub mod purge;
mod signer;

pub use cache::VerifyCache;
pub use claims::{NewSession, SessionClaims};
pub use signer::{LocalRsaSigner, TokenSigner, VaultTransitSigner};

use base64ct::{Base64UrlUnpadded, Encoding};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::{
    jwt::{self, JwtHeader, Segments},
    store::{RevocationStore, UserStore},
    unix_now,
    users::{JourneyState, Role},
};

const DEFAULT_EXPIRES_AFTER_MINUTES: i64 = 60;
const DEFAULT_ADMIN_EXPIRES_AFTER_MINUTES: i64 = 720;
const DEFAULT_VERIFY_CACHE_TTL_SECONDS: u64 = 30;
const DEFAULT_VERIFY_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Error)]
pub enum TokenError {
    /// Structurally invalid token; callers log it apart from routine invalidity.
    #[error("session token not valid: {0}")]
    NotValid(String),
    #[error("failed to sign session token")]
    Signing(#[source] anyhow::Error),
    #[error("token store unavailable")]
    Store(#[source] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    issuer: String,
    audience: String,
    expires_after_minutes: i64,
    admin_expires_after_minutes: i64,
    managed_identity: bool,
    strict_role_validation: bool,
    verify_cache_ttl: Duration,
    verify_cache_capacity: u64,
}

impl SessionConfig {
    #[must_use]
    pub fn new(issuer: String, audience: String) -> Self {
        Self {
            issuer,
            audience,
            expires_after_minutes: DEFAULT_EXPIRES_AFTER_MINUTES,
            admin_expires_after_minutes: DEFAULT_ADMIN_EXPIRES_AFTER_MINUTES,
            managed_identity: true,
            strict_role_validation: false,
            verify_cache_ttl: Duration::from_secs(DEFAULT_VERIFY_CACHE_TTL_SECONDS),
            verify_cache_capacity: DEFAULT_VERIFY_CACHE_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_expires_after_minutes(mut self, minutes: i64) -> Self {
        self.expires_after_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_admin_expires_after_minutes(mut self, minutes: i64) -> Self {
        self.admin_expires_after_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_managed_identity(mut self, enabled: bool) -> Self {
        self.managed_identity = enabled;
        self
    }

    #[must_use]
    pub fn with_strict_role_validation(mut self, enabled: bool) -> Self {
        self.strict_role_validation = enabled;
        self
    }

    #[must_use]
    pub fn with_verify_cache(mut self, ttl: Duration, capacity: u64) -> Self {
        self.verify_cache_ttl = ttl;
        self.verify_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Token lifetime in seconds.
    #[must_use]
    pub fn ttl_seconds(&self, is_admin: bool) -> i64 {
        let minutes = if is_admin {
            self.admin_expires_after_minutes
        } else {
            self.expires_after_minutes
        };
        minutes.saturating_mul(60)
    }
}

pub struct SessionTokenService {
    config: SessionConfig,
    signer: Arc<dyn TokenSigner>,
    revocations: Arc<dyn RevocationStore>,
    users: Arc<dyn UserStore>,
    cache: VerifyCache,
}

/// Whether a user still in onboarding may hold a valid session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Onboarding {
    Reject,
    Allow,
}

impl SessionTokenService {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        signer: Arc<dyn TokenSigner>,
        revocations: Arc<dyn RevocationStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let cache = VerifyCache::new(config.verify_cache_capacity, config.verify_cache_ttl);
        Self {
            config,
            signer,
            revocations,
            users,
            cache,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issue a signed token for `session`.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if the signer fails.
    pub async fn issue(&self, session: NewSession, is_admin: bool) -> Result<String, TokenError> {
        let iat = unix_now();
        let claims = SessionClaims {
            sub: session.sub,
            email: session.email,
            roles: session.roles,
            id_token: session.id_token,
            department: session.department,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat,
            exp: iat.saturating_add(self.config.ttl_seconds(is_admin)),
            jti: Ulid::new().to_string(),
        };

        let key_version = self
            .signer
            .current_key_version()
            .await
            .map_err(TokenError::Signing)?;
        let header = JwtHeader::rs256(format!("{}:v{key_version}", self.signer.key_name()));

        let header_b64 = jwt::b64e_json(&header).map_err(|e| TokenError::Signing(e.into()))?;
        let claims_b64 = jwt::b64e_json(&claims).map_err(|e| TokenError::Signing(e.into()))?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let signature = self
            .signer
            .sign(signing_input.as_bytes(), key_version)
            .await
            .map_err(TokenError::Signing)?;

        Ok(format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature)
        ))
    }

    /// Full verification: signature, expiry, issuer/audience, user state and revocation.
    ///
    /// # Errors
    /// Returns [`TokenError::NotValid`] only for malformed tokens; every other
    /// failure yields `Ok(false)`.
    pub async fn verify(&self, token: &str) -> Result<bool, TokenError> {
        self.verify_with(token, Onboarding::Reject).await
    }

    /// Like [`Self::verify`], but accepts users still in `PRIVACY_POLICY_PENDING`.
    ///
    /// # Errors
    /// Returns [`TokenError::NotValid`] for malformed tokens.
    pub async fn verify_allowing_onboarding(&self, token: &str) -> Result<bool, TokenError> {
        self.verify_with(token, Onboarding::Allow).await
    }

    async fn verify_with(&self, token: &str, onboarding: Onboarding) -> Result<bool, TokenError> {
        let segments = jwt::split(token).map_err(not_valid)?;
        let header: JwtHeader = jwt::b64d_json(segments.header).map_err(not_valid)?;
        let claims: SessionClaims = jwt::b64d_json(segments.claims).map_err(not_valid)?;
        let key_version = self.key_version_from_kid(header.kid.as_deref())?;
        let signature = segments.signature_bytes().map_err(not_valid)?;

        if !self
            .signature_valid(token, &segments, key_version, &signature)
            .await
        {
            debug!("session token signature invalid");
            return Ok(false);
        }

        if claims.exp < unix_now() {
            debug!(sub = %claims.sub, "session token expired");
            return Ok(false);
        }

        if claims.iss != self.config.issuer || claims.aud != self.config.audience {
            warn!(iss = %claims.iss, aud = %claims.aud, "session token issuer/audience mismatch");
            return Ok(false);
        }

        if self.config.managed_identity && !self.user_state_valid(&claims, onboarding).await {
            return Ok(false);
        }

        match self.revocations.exists(token).await {
            Ok(false) => Ok(true),
            Ok(true) => {
                debug!(sub = %claims.sub, "session token revoked");
                Ok(false)
            }
            Err(err) => {
                error!("Failed to check revoked tokens: {err:#}");
                Ok(false)
            }
        }
    }

    fn key_version_from_kid(&self, kid: Option<&str>) -> Result<u32, TokenError> {
        let kid = kid.ok_or_else(|| TokenError::NotValid("missing key id".to_string()))?;
        kid.strip_prefix(self.signer.key_name())
            .and_then(|rest| rest.strip_prefix(":v"))
            .and_then(|version| version.parse::<u32>().ok())
            .ok_or_else(|| TokenError::NotValid(format!("unexpected key id: {kid}")))
    }

    async fn signature_valid(
        &self,
        token: &str,
        segments: &Segments<'_>,
        key_version: u32,
        signature: &[u8],
    ) -> bool {
        if let Some(valid) = self.cache.get(token).await {
            return valid;
        }

        match self
            .signer
            .verify(segments.signing_input().as_bytes(), key_version, signature)
            .await
        {
            Ok(valid) => {
                self.cache.insert(token, valid).await;
                valid
            }
            Err(err) => {
                // Not cached: a signer outage must not pin tokens as invalid.
                error!("Failed to verify session token signature: {err:#}");
                false
            }
        }
    }

    async fn user_state_valid(&self, claims: &SessionClaims, onboarding: Onboarding) -> bool {
        let user = match self.users.resolve(&claims.sub, &claims.email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(sub = %claims.sub, "no user for session token");
                return false;
            }
            Err(err) => {
                error!("Failed to resolve session user: {err:#}");
                return false;
            }
        };

        if self.config.strict_role_validation {
            let claimed: BTreeSet<Role> = claims.roles.iter().copied().collect();
            if claimed != user.roles {
                debug!(sub = %claims.sub, "session roles differ from stored roles");
                return false;
            }
        }

        if onboarding == Onboarding::Reject
            && user.login_journey_state == JourneyState::PrivacyPolicyPending
        {
            debug!(sub = %claims.sub, "user has not accepted the privacy policy");
            return false;
        }

        true
    }

    /// Decode claims without verifying; call after a successful [`Self::verify`].
    ///
    /// # Errors
    /// Returns [`TokenError::NotValid`] for malformed tokens.
    pub fn decode_claims(&self, token: &str) -> Result<SessionClaims, TokenError> {
        jwt::decode_claims_unverified(token).map_err(not_valid)
    }

    /// Revoke `token` until its own `exp`.
    ///
    /// # Errors
    /// Returns [`TokenError::NotValid`] for malformed tokens, [`TokenError::Store`] if the
    /// record cannot be written.
    pub async fn revoke(&self, token: &str) -> Result<(), TokenError> {
        let claims = self.decode_claims(token)?;
        self.revocations
            .add(token, claims.exp)
            .await
            .map_err(TokenError::Store)?;
        self.cache.invalidate(token).await;
        Ok(())
    }

    /// Delete revocation records whose expiry has passed.
    ///
    /// # Errors
    /// Returns [`TokenError::Store`] if the store fails.
    pub async fn purge_expired(&self) -> Result<u64, TokenError> {
        self.revocations
            .purge_expired(unix_now())
            .await
            .map_err(TokenError::Store)
    }
}

fn not_valid(err: jwt::JwtError) -> TokenError {
    TokenError::NotValid(err.to_string())
}
