use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::auth::{AuthState, Principal};
use crate::{
    api::error::{ApiError, ErrorBody},
    users::Role,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct PurgeResult {
    purged: u64,
}

#[utoipa::path(
    post,
    path = "/admin/purge-revoked",
    responses(
        (status = 200, description = "Expired revocation records removed", body = PurgeResult),
        (status = 401, description = "No valid session", body = ErrorBody),
        (status = 403, description = "Caller is not a super admin", body = ErrorBody),
    ),
    tag = "admin"
)]
pub async fn purge_revoked(
    principal: Option<Extension<Principal>>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<Json<PurgeResult>, ApiError> {
    let Some(Extension(principal)) = principal else {
        return Err(ApiError::TokenNotValid("missing session cookie".to_string()));
    };
    principal.require(Role::SuperAdmin)?;

    let purged = state.tokens().purge_expired().await?;
    info!(sub = %principal.sub, purged, "purged expired revocations on demand");
    Ok(Json(PurgeResult { purged }))
}
