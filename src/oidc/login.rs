//! Login handshake: authorize redirect, callback validation and session issuance.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::{
    IdTokenClaims, IdentityProvider, OidcConfig, OidcError, Profile, ReplayGuard, SCOPE,
    UserInfo,
};
use crate::{
    journey::{JourneyContext, LoginJourney},
    jwt,
    store::UserStore,
    token::{NewSession, SessionTokenService},
    unix_now,
    users::{JourneyState, NewUser, User},
};

const MFA_VECTOR: &str = r#"["Cl.Cm"]"#;
const NO_MFA_VECTOR: &str = r#"["Cl"]"#;
const UI_LOCALES: &str = "en";

/// Where to send the browser to start a login, plus the state cookie to set.
#[derive(Clone, Debug)]
pub struct LoginRedirect {
    pub authorize_url: String,
    pub state_cookie: String,
}

#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub session_token: String,
    pub redirect_url: String,
    pub journey_state: JourneyState,
}

pub struct LoginOrchestrator {
    config: OidcConfig,
    provider: Arc<dyn IdentityProvider>,
    replay: ReplayGuard,
    users: Arc<dyn UserStore>,
    tokens: Arc<SessionTokenService>,
    journey: Arc<LoginJourney>,
}

impl LoginOrchestrator {
    #[must_use]
    pub fn new(
        config: OidcConfig,
        provider: Arc<dyn IdentityProvider>,
        replay: ReplayGuard,
        users: Arc<dyn UserStore>,
        tokens: Arc<SessionTokenService>,
        journey: Arc<LoginJourney>,
    ) -> Self {
        Self {
            config,
            provider,
            replay,
            users,
            tokens,
            journey,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Start a login that returns to `redirect_url`.
    ///
    /// # Errors
    /// Returns [`OidcError::Store`] if the challenge cannot be persisted.
    pub async fn begin_login(&self, redirect_url: &str) -> Result<LoginRedirect, OidcError> {
        let challenge = self.replay.issue_login_challenge(redirect_url).await?;

        let mut authorize_url = Url::parse(&self.config.authorize_endpoint())
            .map_err(|err| OidcError::Store(err.into()))?;
        authorize_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPE)
            .append_pair("client_id", self.config.client_id())
            .append_pair("state", &challenge.hashed_state)
            .append_pair("redirect_uri", self.config.redirect_uri())
            .append_pair("nonce", &challenge.nonce)
            .append_pair(
                "vtr",
                if self.config.mfa_enabled() {
                    MFA_VECTOR
                } else {
                    NO_MFA_VECTOR
                },
            )
            .append_pair("ui_locales", UI_LOCALES);

        Ok(LoginRedirect {
            authorize_url: authorize_url.to_string(),
            state_cookie: challenge.state_cookie,
        })
    }

    /// Handle the provider callback.
    ///
    /// # Errors
    /// [`OidcError::AuthenticationFailure`] when a provider call fails,
    /// [`OidcError::UnauthorizedClient`] or [`OidcError::NonceExpired`] when validation
    /// fails, [`OidcError::Store`] or [`OidcError::Token`] on internal failures.
    #[instrument(skip_all)]
    pub async fn complete_login(
        &self,
        code: &str,
        query_state: &str,
        state_cookie: &str,
    ) -> Result<LoginOutcome, OidcError> {
        let tokens = self.provider.exchange_code(code).await.map_err(|err| {
            error!("Code exchange failed: {err:#}");
            OidcError::AuthenticationFailure(err.to_string())
        })?;

        let id_claims = self.id_token_claims(&tokens.id_token).await?;
        self.validate_id_claims(&id_claims)?;

        jwt::verify_with_source::<Value>(&tokens.access_token, self.provider.keys())
            .await
            .map_err(|err| {
                warn!("Access token rejected: {err}");
                OidcError::UnauthorizedClient("access token signature invalid".to_string())
            })?;

        let nonce = id_claims.nonce.as_deref().unwrap_or_default();
        let state = self
            .replay
            .verify_callback(state_cookie, query_state, nonce)
            .await?;

        let user_info = self
            .provider
            .user_info(&tokens.access_token)
            .await
            .map_err(|err| {
                error!("User info request failed: {err:#}");
                OidcError::AuthenticationFailure(err.to_string())
            })?;
        if self.config.profile() != Profile::Local && user_info.sub != id_claims.sub {
            warn!("user info subject does not match ID token subject");
            return Err(OidcError::UnauthorizedClient("subject mismatch".to_string()));
        }

        let user = self.resolve_user(&user_info).await?;
        let context = JourneyContext {
            privacy_policy_accepted: false,
            provider_email: Some(user_info.email),
            redirect_url: state.redirect_url,
        };
        let outcome = self
            .journey
            .advance(user, &context)
            .await
            .map_err(OidcError::Store)?;

        // Claims come from the user as the journey left it.
        let session_token = self
            .tokens
            .issue(
                NewSession::for_user(&outcome.user, Some(tokens.id_token)),
                outcome.user.is_admin(),
            )
            .await?;

        info!(user = %outcome.user.id, state = %outcome.state, "login completed");
        Ok(LoginOutcome {
            user: outcome.user,
            session_token,
            redirect_url: outcome.redirect_url,
            journey_state: outcome.state,
        })
    }

    async fn id_token_claims(&self, id_token: &str) -> Result<IdTokenClaims, OidcError> {
        let claims = if self.config.profile() == Profile::Local {
            jwt::decode_claims_unverified(id_token)
        } else {
            jwt::verify_with_source(id_token, self.provider.keys()).await
        };
        claims.map_err(|err| {
            warn!("ID token rejected: {err}");
            OidcError::UnauthorizedClient("ID token invalid".to_string())
        })
    }

    fn validate_id_claims(&self, claims: &IdTokenClaims) -> Result<(), OidcError> {
        let now = unix_now();
        let reason = if claims.iss != self.config.issuer() {
            Some("issuer mismatch")
        } else if !claims.aud.contains(self.config.client_id()) {
            Some("audience mismatch")
        } else if claims.exp < now {
            Some("ID token expired")
        } else if claims.iat > now {
            Some("ID token issued in the future")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!(iss = %claims.iss, "{reason}");
                Err(OidcError::UnauthorizedClient(reason.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Match by subject, then by email (backfilling the subject), else create.
    async fn resolve_user(&self, info: &UserInfo) -> Result<User, OidcError> {
        if let Some(user) = self
            .users
            .find_by_sub(&info.sub)
            .await
            .map_err(OidcError::Store)?
        {
            return Ok(user);
        }

        if let Some(mut user) = self
            .users
            .find_by_email(&info.email)
            .await
            .map_err(OidcError::Store)?
        {
            if user.sub.is_none() {
                debug!(user = %user.id, "backfilling subject");
                self.users
                    .set_sub(user.id, &info.sub)
                    .await
                    .map_err(OidcError::Store)?;
                user.sub = Some(info.sub.clone());
            }
            return Ok(user);
        }

        let user = self
            .users
            .create(NewUser {
                sub: info.sub.clone(),
                email: info.email.clone(),
            })
            .await
            .map_err(OidcError::Store)?;
        info!(user = %user.id, "created user on first login");
        Ok(user)
    }

    /// Provider logout URL carrying the ID token as a hint.
    #[must_use]
    pub fn logout_url(&self, id_token: Option<&str>) -> String {
        let Ok(mut url) = Url::parse(&self.config.logout_endpoint()) else {
            return self.config.post_logout_uri().to_string();
        };
        {
            let mut query = url.query_pairs_mut();
            if let Some(id_token) = id_token {
                query.append_pair("id_token_hint", id_token);
            }
            query.append_pair("post_logout_redirect_uri", self.config.post_logout_uri());
        }
        url.to_string()
    }
}
