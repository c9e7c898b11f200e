use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::users::{Role, User, highest_role};

/// Claims carried by a session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    pub roles: Vec<Role>,
    #[serde(rename = "idToken", default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique per issuance, so two sessions minted in the same second still differ.
    #[serde(default)]
    pub jti: String,
}

impl SessionClaims {
    #[must_use]
    pub fn highest_role(&self) -> Option<Role> {
        highest_role(&self.roles)
    }

    /// Role authorities for downstream authorization checks.
    #[must_use]
    pub fn authorities(&self) -> Vec<String> {
        self.roles.iter().map(|role| role.authority()).collect()
    }
}

/// Caller-supplied claims; the service fills in `iss`, `aud`, `iat` and `exp`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewSession {
    pub sub: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub id_token: Option<String>,
    pub department: Option<String>,
}

impl NewSession {
    /// Claims for `user`, carrying the provider ID token for logout.
    #[must_use]
    pub fn for_user(user: &User, id_token: Option<String>) -> Self {
        Self {
            sub: user.sub.clone().unwrap_or_default(),
            email: user.email.clone(),
            roles: user.roles.iter().copied().collect(),
            id_token,
            department: user.department.clone(),
        }
    }
}
