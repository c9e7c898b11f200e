//! HTTP error taxonomy.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

use crate::{
    legacy::LegacyTokenError, oidc::OidcError, token::TokenError, users::UnknownRole,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("identity provider request failed: {0}")]
    AuthenticationFailure(String),
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),
    #[error("login attempt expired, please try again")]
    NonceExpired,
    #[error("session token not valid: {0}")]
    TokenNotValid(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("role not found: {0}")]
    RoleNotFound(String),
    #[error("department not found: {0}")]
    DepartmentNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    /// Set when starting over is expected to succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthenticationFailure(_) => StatusCode::BAD_GATEWAY,
            Self::UnauthorizedClient(_) | Self::NonceExpired | Self::TokenNotValid(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::UserNotFound(_) | Self::RoleNotFound(_) | Self::DepartmentNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure(_) => "AuthenticationFailure",
            Self::UnauthorizedClient(_) => "UnauthorizedClient",
            Self::NonceExpired => "NonceExpired",
            Self::TokenNotValid(_) => "TokenNotValid",
            Self::UserNotFound(_) => "UserNotFound",
            Self::RoleNotFound(_) => "RoleNotFound",
            Self::DepartmentNotFound(_) => "DepartmentNotFound",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Forbidden(_) => "Forbidden",
            Self::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(err) => error!("Request failed: {err:#}"),
            Self::AuthenticationFailure(_) | Self::UnauthorizedClient(_) => warn!("{self}"),
            _ => debug!("{self}"),
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            retry: matches!(self, Self::NonceExpired).then_some(true),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<OidcError> for ApiError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::AuthenticationFailure(reason) => Self::AuthenticationFailure(reason),
            OidcError::UnauthorizedClient(reason) => Self::UnauthorizedClient(reason),
            OidcError::NonceExpired => Self::NonceExpired,
            OidcError::Token(err) => err.into(),
            OidcError::Store(err) => Self::Internal(err),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotValid(reason) => Self::TokenNotValid(reason),
            TokenError::Signing(err) | TokenError::Store(err) => Self::Internal(err),
        }
    }
}

impl From<LegacyTokenError> for ApiError {
    fn from(err: LegacyTokenError) -> Self {
        match err {
            LegacyTokenError::InvalidThirdPartyToken(reason) => Self::UnauthorizedClient(reason),
        }
    }
}

impl From<UnknownRole> for ApiError {
    fn from(err: UnknownRole) -> Self {
        Self::RoleNotFound(err.0)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(
            ApiError::AuthenticationFailure(String::new()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::UnauthorizedClient(String::new()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::NonceExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::DepartmentNotFound(String::new()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidRequest(String::new()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Forbidden(String::new()).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn oidc_errors_keep_their_kind() {
        let err: ApiError = OidcError::NonceExpired.into();
        assert_eq!(err.kind(), "NonceExpired");
        let err: ApiError = OidcError::Token(TokenError::NotValid("bad".to_string())).into();
        assert_eq!(err.kind(), "TokenNotValid");
    }

    #[tokio::test]
    async fn nonce_expired_body_asks_for_retry() -> anyhow::Result<()> {
        let response = ApiError::NonceExpired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let json: Value = serde_json::from_slice(&body)?;
        assert_eq!(json["error"], "NonceExpired");
        assert_eq!(json["retry"], true);
        Ok(())
    }

    #[tokio::test]
    async fn internal_errors_hide_details() -> anyhow::Result<()> {
        let response = ApiError::Internal(anyhow::anyhow!("db password wrong")).into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let json: Value = serde_json::from_slice(&body)?;
        assert_eq!(json["message"], "internal error");
        Ok(())
    }
}
