//! Privacy-policy consent and the email-change notice.
//!
//! These run for sessions whose user is still onboarding, so they verify the cookie
//! themselves instead of relying on the auth filter.

use axum::{
    Extension, Form, Json,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{
    auth::{AuthState, Principal, cookies::read_cookie, redirect::safe_redirect},
    redirect_with_cookies,
};
use crate::{
    api::error::{ApiError, ErrorBody},
    journey::JourneyContext,
    users::{JourneyState, User},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct PrivacyPolicyStatus {
    pending: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyPolicyForm {
    accept_privacy_policy: bool,
    redirect_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdatedEmail {
    email: String,
}

/// User behind a session cookie, allowing users who have not yet consented.
async fn onboarding_user(headers: &HeaderMap, state: &AuthState) -> Result<User, ApiError> {
    let token = read_cookie(headers, state.config().session_cookie_name())
        .ok_or_else(|| ApiError::TokenNotValid("missing session cookie".to_string()))?;
    if !state.tokens().verify_allowing_onboarding(&token).await? {
        return Err(ApiError::TokenNotValid(
            "session expired or revoked".to_string(),
        ));
    }
    let claims = state.tokens().decode_claims(&token)?;
    state
        .users()
        .find_by_sub(&claims.sub)
        .await?
        .ok_or(ApiError::UserNotFound(claims.sub))
}

#[utoipa::path(
    get,
    path = "/privacy-policy",
    responses(
        (status = 200, description = "Whether consent is still pending", body = PrivacyPolicyStatus),
        (status = 401, description = "Session is not valid", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn privacy_policy(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Json<PrivacyPolicyStatus>, ApiError> {
    let user = onboarding_user(&headers, &state).await?;
    Ok(Json(PrivacyPolicyStatus {
        pending: user.login_journey_state == JourneyState::PrivacyPolicyPending,
    }))
}

#[utoipa::path(
    post,
    path = "/privacy-policy",
    request_body(content = PrivacyPolicyForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Consent recorded, redirect to the journey landing page"),
        (status = 400, description = "Consent was declined", body = ErrorBody),
        (status = 401, description = "Session is not valid", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn accept_privacy_policy(
    headers: HeaderMap,
    Extension(state): Extension<Arc<AuthState>>,
    Form(form): Form<PrivacyPolicyForm>,
) -> Result<Response, ApiError> {
    if !form.accept_privacy_policy {
        return Err(ApiError::InvalidRequest(
            "the privacy policy must be accepted".to_string(),
        ));
    }

    let user = onboarding_user(&headers, &state).await?;
    let context = JourneyContext {
        privacy_policy_accepted: true,
        provider_email: None,
        redirect_url: safe_redirect(form.redirect_url.as_deref(), state.journey().landing()),
    };
    let outcome = state.journey().advance(user, &context).await?;
    info!(user = %outcome.user.id, state = %outcome.state, "privacy policy accepted");

    redirect_with_cookies(StatusCode::SEE_OTHER, &outcome.redirect_url, Vec::new())
}

#[utoipa::path(
    get,
    path = "/updated-email",
    responses(
        (status = 200, description = "Current email of the signed-in user", body = UpdatedEmail),
        (status = 401, description = "No valid session", body = ErrorBody),
        (status = 404, description = "Session user no longer exists", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn updated_email(
    principal: Option<Extension<Principal>>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Json<UpdatedEmail>, ApiError> {
    let Some(Extension(principal)) = principal else {
        return Err(ApiError::TokenNotValid("missing session cookie".to_string()));
    };
    let user = state
        .users()
        .find_by_sub(&principal.sub)
        .await?
        .ok_or(ApiError::UserNotFound(principal.sub))?;
    Ok(Json(UpdatedEmail { email: user.email }))
}
