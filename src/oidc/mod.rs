//! OpenID Connect login against the external identity provider.

pub mod login;
pub mod provider;
pub mod replay;

pub use login::{LoginOrchestrator, LoginOutcome, LoginRedirect};
pub use provider::{HttpIdentityProvider, IdTokenClaims, IdentityProvider, TokenResponse, UserInfo};
pub use replay::{LoginChallenge, ReplayError, ReplayGuard, StatePayload};

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::token::TokenError;

/// Scope requested from the provider.
pub const SCOPE: &str = "openid email phone";

#[derive(Debug, Error)]
pub enum OidcError {
    /// The provider call itself failed.
    #[error("identity provider request failed: {0}")]
    AuthenticationFailure(String),
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),
    #[error("login attempt expired")]
    NonceExpired,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("login store unavailable")]
    Store(#[source] anyhow::Error),
}

impl From<ReplayError> for OidcError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::UnauthorizedClient(reason) => Self::UnauthorizedClient(reason.to_string()),
            ReplayError::NonceExpired => Self::NonceExpired,
            ReplayError::Store(err) => Self::Store(err),
        }
    }
}

/// Deployment profile. `Local` skips ID token signature and userinfo subject checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profile {
    Local,
    #[default]
    Default,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Default => "default",
        })
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "default" => Ok(Self::Default),
            _ => Err(format!("unknown profile: {s}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OidcConfig {
    base_url: String,
    client_id: String,
    redirect_uri: String,
    post_logout_uri: String,
    mfa_enabled: bool,
    profile: Profile,
}

impl OidcConfig {
    #[must_use]
    pub fn new(base_url: &str, client_id: String, redirect_uri: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            redirect_uri,
            post_logout_uri: String::new(),
            mfa_enabled: true,
            profile: Profile::Default,
        }
    }

    #[must_use]
    pub fn with_post_logout_uri(mut self, uri: String) -> Self {
        self.post_logout_uri = uri;
        self
    }

    #[must_use]
    pub fn with_mfa_enabled(mut self, enabled: bool) -> Self {
        self.mfa_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn post_logout_uri(&self) -> &str {
        &self.post_logout_uri
    }

    #[must_use]
    pub fn mfa_enabled(&self) -> bool {
        self.mfa_enabled
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Expected `iss`: the base URL with a trailing slash.
    #[must_use]
    pub fn issuer(&self) -> String {
        format!("{}/", self.base_url)
    }

    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.base_url)
    }

    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.base_url)
    }

    #[must_use]
    pub fn userinfo_endpoint(&self) -> String {
        format!("{}/userinfo", self.base_url)
    }

    #[must_use]
    pub fn jwks_uri(&self) -> String {
        format!("{}/.well-known/jwks.json", self.base_url)
    }

    #[must_use]
    pub fn logout_endpoint(&self) -> String {
        format!("{}/logout", self.base_url)
    }
}

/// 32 random bytes, base64url.
pub(crate) fn random_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random value")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_derive_from_base_url() {
        let config = OidcConfig::new(
            "https://oidc.test/",
            "client".to_string(),
            "https://sesame.test/redirect-after-login".to_string(),
        );
        assert_eq!(config.issuer(), "https://oidc.test/");
        assert_eq!(config.authorize_endpoint(), "https://oidc.test/authorize");
        assert_eq!(config.token_endpoint(), "https://oidc.test/token");
        assert_eq!(config.userinfo_endpoint(), "https://oidc.test/userinfo");
        assert_eq!(config.jwks_uri(), "https://oidc.test/.well-known/jwks.json");
        assert_eq!(config.logout_endpoint(), "https://oidc.test/logout");
    }

    #[test]
    fn profile_parses() {
        assert_eq!("LOCAL".parse::<Profile>(), Ok(Profile::Local));
        assert_eq!("default".parse::<Profile>(), Ok(Profile::Default));
        assert!("prod".parse::<Profile>().is_err());
    }

    #[test]
    fn random_tokens_differ() -> Result<()> {
        let a = random_token()?;
        let b = random_token()?;
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        Ok(())
    }
}
