//! Session queries used by the frontends and sibling services.

use axum::{
    Extension, Json,
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use super::{
    auth::{
        AuthState,
        cookies::{read_cookie, session_cookie},
        redirect::safe_redirect,
    },
    header_error, redirect_with_cookies, valid_email,
};
use crate::{
    api::error::{ApiError, ErrorBody},
    token::NewSession,
    users::Role,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRolesRequest {
    email_address: String,
    roles: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// Unix seconds at which the new session expires.
    expires_at: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct RefreshQuery {
    redirect_url: Option<String>,
}

#[utoipa::path(
    post,
    path = "/validate-sessions-roles",
    request_body = ValidateRolesRequest,
    responses(
        (status = 200, description = "Whether the stored roles match exactly", body = bool),
        (status = 400, description = "Malformed email address", body = ErrorBody),
        (status = 404, description = "Unknown user or role", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn validate_sessions_roles(
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<ValidateRolesRequest>,
) -> Result<Json<bool>, ApiError> {
    if !valid_email(request.email_address.trim()) {
        return Err(ApiError::InvalidRequest("invalid email address".to_string()));
    }

    let claimed = request
        .roles
        .iter()
        .map(|role| role.parse::<Role>())
        .collect::<Result<BTreeSet<Role>, _>>()?;

    let user = state
        .users()
        .find_by_email(&request.email_address)
        .await?
        .ok_or_else(|| ApiError::UserNotFound(request.email_address.clone()))?;

    let matches = user.roles == claimed;
    debug!(user = %user.id, matches, "validated session roles");
    Ok(Json(matches))
}

#[utoipa::path(
    get,
    path = "/is-user-logged-in",
    responses(
        (status = 200, description = "Whether the session or legacy cookie is valid", body = bool),
        (status = 401, description = "Legacy cookie issued for another audience", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn is_user_logged_in(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Json<bool>, ApiError> {
    if let Some(token) = read_cookie(&headers, state.config().session_cookie_name())
        && state.tokens().verify(&token).await?
    {
        return Ok(Json(true));
    }

    if let Some(legacy) = state.legacy()
        && let Some(raw) = read_cookie(&headers, legacy.config().cookie_name())
    {
        return Ok(Json(legacy.verify(&raw).await?));
    }

    Ok(Json(false))
}

#[utoipa::path(
    get,
    path = "/refresh-token",
    params(RefreshQuery),
    responses(
        (status = 200, description = "Session re-issued", body = RefreshResponse),
        (status = 302, description = "Session re-issued, redirect to `redirectUrl`"),
        (status = 401, description = "Current session is not valid", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh_token_get(
    headers: HeaderMap,
    Query(query): Query<RefreshQuery>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    refresh(&headers, query.redirect_url.as_deref(), &state).await
}

#[utoipa::path(
    post,
    path = "/refresh-token",
    responses(
        (status = 200, description = "Session re-issued", body = RefreshResponse),
        (status = 401, description = "Current session is not valid", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh_token_post(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    refresh(&headers, None, &state).await
}

async fn refresh(
    headers: &HeaderMap,
    redirect_url: Option<&str>,
    state: &AuthState,
) -> Result<Response, ApiError> {
    let tokens = state.tokens();
    let current = read_cookie(headers, state.config().session_cookie_name())
        .ok_or_else(|| ApiError::TokenNotValid("missing session cookie".to_string()))?;
    if !tokens.verify(&current).await? {
        return Err(ApiError::TokenNotValid(
            "session expired or revoked".to_string(),
        ));
    }

    let claims = tokens.decode_claims(&current)?;
    let user = state
        .users()
        .find_by_sub(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::UserNotFound(claims.sub.clone()))?;

    let is_admin = user.is_admin();
    let refreshed = tokens
        .issue(NewSession::for_user(&user, claims.id_token), is_admin)
        .await?;
    tokens.revoke(&current).await?;
    info!(user = %user.id, "session refreshed");

    let ttl = tokens.config().ttl_seconds(is_admin);
    let cookie = session_cookie(state.config(), &refreshed, ttl).map_err(header_error)?;

    if let Some(redirect_url) = redirect_url {
        let location = safe_redirect(Some(redirect_url), state.journey().landing());
        return redirect_with_cookies(StatusCode::FOUND, &location, vec![cookie]);
    }

    let expires_at = tokens.decode_claims(&refreshed)?.exp;
    let mut response = Json(RefreshResponse { expires_at }).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, cookie);
    Ok(response)
}
