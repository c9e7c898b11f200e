//! Shared state for the session endpoints.
//!
//! Flow Overview:
//! 1) `/login` starts the provider handshake and sets the `state` cookie.
//! 2) `/redirect-after-login` validates the callback, issues the session cookie and
//!    runs the login journey.
//! 3) Every other request passes through [`principal::auth_filter`], which turns a
//!    verified session cookie into a [`Principal`].

pub mod cookies;
pub mod principal;
pub mod redirect;

pub use principal::{Principal, auth_filter};

use std::sync::Arc;

use crate::{
    journey::LoginJourney, legacy::LegacyTokenBridge, oidc::LoginOrchestrator,
    store::UserStore, token::SessionTokenService,
};

const DEFAULT_SESSION_COOKIE_NAME: &str = "user-service-token";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    session_cookie_name: String,
    session_cookie_domain: Option<String>,
    cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            session_cookie_domain: None,
            cookie_secure: true,
        }
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: String) -> Self {
        self.session_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_session_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.session_cookie_domain = domain.filter(|domain| !domain.is_empty());
        self
    }

    /// Plain-HTTP local development only.
    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    #[must_use]
    pub fn session_cookie_domain(&self) -> Option<&str> {
        self.session_cookie_domain.as_deref()
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: Arc<SessionTokenService>,
    login: Arc<LoginOrchestrator>,
    journey: Arc<LoginJourney>,
    users: Arc<dyn UserStore>,
    legacy: Option<Arc<LegacyTokenBridge>>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: Arc<SessionTokenService>,
        login: Arc<LoginOrchestrator>,
        journey: Arc<LoginJourney>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            config,
            tokens,
            login,
            journey,
            users,
            legacy: None,
        }
    }

    #[must_use]
    pub fn with_legacy(mut self, legacy: Arc<LegacyTokenBridge>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &SessionTokenService {
        &self.tokens
    }

    #[must_use]
    pub fn login(&self) -> &LoginOrchestrator {
        &self.login
    }

    #[must_use]
    pub fn journey(&self) -> &LoginJourney {
        &self.journey
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    #[must_use]
    pub fn legacy(&self) -> Option<&LegacyTokenBridge> {
        self.legacy.as_deref()
    }
}
