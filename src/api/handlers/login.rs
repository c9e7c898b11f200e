//! `/login`, `/redirect-after-login` and `/logout`.

use axum::{
    Extension,
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::IntoParams;

use super::{
    auth::{
        AuthState,
        cookies::{
            STATE_COOKIE_NAME, clear_cookie, clear_session_cookie, clear_state_cookie,
            read_cookie, session_cookie, state_cookie,
        },
        redirect::{is_not_found_page, safe_redirect},
    },
    header_error, redirect_with_cookies,
};
use crate::{api::error::ApiError, oidc::StatePayload, token::TokenError};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct LoginQuery {
    /// Where to land after signing in.
    redirect_url: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

#[utoipa::path(
    get,
    path = "/login",
    params(LoginQuery),
    responses(
        (status = 302, description = "Redirect to the identity provider, or straight to the landing page when already signed in"),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let landing = state.journey().landing();
    let redirect_url = safe_redirect(query.redirect_url.as_deref(), landing);

    if let Some(token) = read_cookie(&headers, state.config().session_cookie_name())
        && matches!(state.tokens().verify(&token).await, Ok(true))
    {
        let claims = state.tokens().decode_claims(&token)?;
        let location = if is_not_found_page(&redirect_url) {
            landing.not_found(claims.highest_role())
        } else {
            redirect_url
        };
        debug!(sub = %claims.sub, "already signed in");
        return redirect_with_cookies(StatusCode::FOUND, &location, Vec::new());
    }

    let redirect = state.login().begin_login(&redirect_url).await?;
    let cookie = state_cookie(state.config(), &redirect.state_cookie).map_err(header_error)?;
    redirect_with_cookies(StatusCode::FOUND, &redirect.authorize_url, vec![cookie])
}

#[utoipa::path(
    get,
    path = "/redirect-after-login",
    params(CallbackQuery),
    responses(
        (status = 302, description = "Session cookie set, redirect to the journey landing page"),
        (status = 401, description = "State, nonce or token validation failed", body = crate::api::error::ErrorBody),
        (status = 502, description = "Identity provider call failed", body = crate::api::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn redirect_after_login(
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let config = state.config();
    let state_value = read_cookie(&headers, STATE_COOKIE_NAME);

    // Repeated callback from a browser that already holds a session.
    if let Some(token) = read_cookie(&headers, config.session_cookie_name())
        && matches!(state.tokens().verify(&token).await, Ok(true))
    {
        let location = state_value
            .as_deref()
            .and_then(|value| StatePayload::decode(value).ok())
            .map(|payload| payload.redirect_url);
        let location = safe_redirect(location.as_deref(), state.journey().landing());
        let cleared = clear_state_cookie(config).map_err(header_error)?;
        return redirect_with_cookies(StatusCode::FOUND, &location, vec![cleared]);
    }

    let state_value = state_value
        .ok_or_else(|| ApiError::UnauthorizedClient("missing state cookie".to_string()))?;

    let outcome = state
        .login()
        .complete_login(&query.code, &query.state, &state_value)
        .await?;

    let ttl = state.tokens().config().ttl_seconds(outcome.user.is_admin());
    let cookies = vec![
        session_cookie(config, &outcome.session_token, ttl).map_err(header_error)?,
        clear_state_cookie(config).map_err(header_error)?,
    ];
    redirect_with_cookies(StatusCode::FOUND, &outcome.redirect_url, cookies)
}

#[utoipa::path(
    get,
    path = "/logout",
    responses(
        (status = 302, description = "Session revoked, redirect to the provider logout endpoint"),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let config = state.config();
    let Some(token) = read_cookie(&headers, config.session_cookie_name()) else {
        return redirect_with_cookies(
            StatusCode::FOUND,
            state.login().config().post_logout_uri(),
            Vec::new(),
        );
    };

    let id_token = match state.tokens().decode_claims(&token) {
        Ok(claims) => claims.id_token,
        Err(err) => {
            warn!("logout with unreadable session token: {err}");
            None
        }
    };

    match state.tokens().revoke(&token).await {
        Ok(()) => info!("session revoked"),
        Err(TokenError::NotValid(reason)) => debug!("nothing to revoke: {reason}"),
        Err(err) => return Err(err.into()),
    }

    let mut cookies = vec![clear_session_cookie(config).map_err(header_error)?];
    if let Some(legacy) = state.legacy() {
        cookies.push(clear_cookie(config, legacy.config().cookie_name()).map_err(header_error)?);
    }

    let location = state.login().logout_url(id_token.as_deref());
    redirect_with_cookies(StatusCode::FOUND, &location, cookies)
}
