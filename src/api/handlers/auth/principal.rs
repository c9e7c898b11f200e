//! Request auth filter and the authenticated principal it produces.
//!
//! Flow Overview: skip public paths, read the session cookie, verify it, then attach a
//! principal built from the verified claims. Roles are taken from the token as-is; the
//! user store is not consulted again on this path.

use axum::{
    Extension,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use super::{AuthState, cookies::read_cookie};
use crate::{
    api::error::ApiError,
    users::Role,
};

/// Paths served without a verified session.
const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/login",
    "/redirect-after-login",
    "/logout",
    "/is-user-logged-in",
    "/privacy-policy",
    "/refresh-token",
];

const PUBLIC_PREFIXES: &[&str] = &["/swagger-ui", "/api-docs"];

/// Authenticated caller derived from the session cookie.
#[derive(Clone, Debug)]
pub struct Principal {
    pub sub: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub authorities: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|granted| granted == authority)
    }

    /// Fail with `Forbidden` unless the caller holds `role`.
    ///
    /// # Errors
    /// Returns [`ApiError::Forbidden`] when the authority is missing.
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.has_authority(&role.authority()) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("{} required", role.authority())))
        }
    }
}

#[must_use]
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Middleware verifying the session cookie on non-public paths.
pub async fn auth_filter(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(token) = read_cookie(request.headers(), state.config().session_cookie_name())
    else {
        return next.run(request).await;
    };

    match authenticate(&state, &token).await {
        Ok(principal) => {
            debug!(sub = %principal.sub, "session verified");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

async fn authenticate(state: &AuthState, token: &str) -> Result<Principal, ApiError> {
    if !state.tokens().verify(token).await? {
        return Err(ApiError::TokenNotValid(
            "session expired or revoked".to_string(),
        ));
    }
    let claims = state.tokens().decode_claims(token)?;
    let authorities = claims.authorities();
    Ok(Principal {
        sub: claims.sub,
        email: claims.email,
        roles: claims.roles,
        authorities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_skip_the_filter() {
        assert!(is_public_path("/login"));
        assert!(is_public_path("/swagger-ui/index.html"));
        assert!(is_public_path("/api-docs/openapi.json"));
        assert!(!is_public_path("/updated-email"));
        assert!(!is_public_path("/validate-sessions-roles"));
        assert!(!is_public_path("/loginx"));
    }

    #[test]
    fn require_checks_authorities() {
        let principal = Principal {
            sub: "S1".to_string(),
            email: "a@b.com".to_string(),
            roles: vec![Role::SuperAdmin],
            authorities: vec![Role::SuperAdmin.authority()],
        };
        assert!(principal.require(Role::SuperAdmin).is_ok());
        assert!(matches!(
            principal.require(Role::TechnicalSupport),
            Err(ApiError::Forbidden(_))
        ));
    }
}
