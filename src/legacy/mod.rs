//! Bridge for session cookies issued by the previous identity scheme.
//!
//! A legacy cookie is a 2-character marker followed by four dot-separated segments:
//! an RS256 token (`header.claims.signature`) and an HMAC-SHA256 over those three
//! segments keyed by the shared cookie secret.

use base64ct::{Base64Unpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::{fmt, sync::Arc};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    jwt::{self, KeySource},
    oidc::provider::Audience,
    unix_now,
};

const MARKER_LEN: usize = 2;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum LegacyTokenError {
    /// Signed correctly but issued for someone else: configuration drift or an attack.
    #[error("not a valid third-party token: {0}")]
    InvalidThirdPartyToken(String),
}

#[derive(Clone)]
pub struct LegacyConfig {
    cookie_name: String,
    secret: SecretString,
    issuer: String,
    audience: String,
}

impl LegacyConfig {
    #[must_use]
    pub fn new(cookie_name: String, secret: SecretString, issuer: String, audience: String) -> Self {
        Self {
            cookie_name,
            secret,
            issuer,
            audience,
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

impl fmt::Debug for LegacyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyConfig")
            .field("cookie_name", &self.cookie_name)
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LegacyClaims {
    iss: String,
    aud: Audience,
    exp: i64,
}

pub struct LegacyTokenBridge {
    config: LegacyConfig,
    keys: Arc<dyn KeySource>,
}

impl LegacyTokenBridge {
    #[must_use]
    pub fn new(config: LegacyConfig, keys: Arc<dyn KeySource>) -> Self {
        Self { config, keys }
    }

    #[must_use]
    pub fn config(&self) -> &LegacyConfig {
        &self.config
    }

    /// Check a raw legacy cookie value.
    ///
    /// # Errors
    /// Returns [`LegacyTokenError::InvalidThirdPartyToken`] when a correctly signed token
    /// carries an unexpected issuer or audience.
    pub async fn verify(&self, raw_cookie: &str) -> Result<bool, LegacyTokenError> {
        let Some(token) = self.inner_token(raw_cookie) else {
            return Ok(false);
        };

        let claims: LegacyClaims = match jwt::verify_with_source(token, self.keys.as_ref()).await {
            Ok(claims) => claims,
            Err(err) => {
                debug!("legacy token rejected: {err}");
                return Ok(false);
            }
        };

        if claims.exp < unix_now() {
            debug!("legacy token expired");
            return Ok(false);
        }

        if claims.iss != self.config.issuer || !claims.aud.contains(&self.config.audience) {
            error!(iss = %claims.iss, "legacy token issuer/audience mismatch");
            return Err(LegacyTokenError::InvalidThirdPartyToken(format!(
                "unexpected issuer or audience from {}",
                claims.iss
            )));
        }

        Ok(true)
    }

    /// Strip the marker and the outer signature, returning the inner token.
    fn inner_token<'a>(&self, raw_cookie: &'a str) -> Option<&'a str> {
        let body = raw_cookie.get(MARKER_LEN..)?;
        let (token, outer_signature) = body.rsplit_once('.')?;
        if token.split('.').count() != 3 {
            debug!("legacy cookie has the wrong number of segments");
            return None;
        }

        let expected = outer_signature_for(token, &self.config.secret).ok()?;
        if !bool::from(expected.as_bytes().ct_eq(outer_signature.as_bytes())) {
            warn!("legacy cookie outer signature invalid");
            return None;
        }
        Some(token)
    }
}

/// Base64 (unpadded) HMAC-SHA256 over `token`.
///
/// # Errors
/// Returns an error if the secret cannot key the MAC.
pub fn outer_signature_for(token: &str, secret: &SecretString) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid cookie secret"))?;
    mac.update(token.as_bytes());
    Ok(Base64Unpadded::encode_string(&mac.finalize().into_bytes()))
}
