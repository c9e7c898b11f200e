//! User model: roles, journey state and downstream migration status.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("role not found: {0}")]
pub struct UnknownRole(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

/// Roles ordered from lowest to highest; `Ord` gives the "highest role" order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Find,
    Applicant,
    TechnicalSupport,
    Admin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Find => "FIND",
            Self::Applicant => "APPLICANT",
            Self::TechnicalSupport => "TECHNICAL_SUPPORT",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// Admin roles get the longer session lifetime.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::TechnicalSupport | Self::Admin | Self::SuperAdmin)
    }

    /// Spring-style authority name exposed to authorization checks.
    #[must_use]
    pub fn authority(self) -> String {
        format!("ROLE_{}", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIND" => Ok(Self::Find),
            "APPLICANT" => Ok(Self::Applicant),
            "TECHNICAL_SUPPORT" => Ok(Self::TechnicalSupport),
            "ADMIN" => Ok(Self::Admin),
            "SUPER_ADMIN" => Ok(Self::SuperAdmin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Highest role in a set, independent of insertion order.
pub fn highest_role<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Option<Role> {
    roles.into_iter().copied().max()
}

/// Roles assigned on first login.
#[must_use]
pub fn default_roles() -> BTreeSet<Role> {
    BTreeSet::from([Role::Applicant, Role::Find])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    NotStarted,
    Succeeded,
    Failed,
    NewUser,
    AlreadyMigrated,
}

impl MigrationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::NewUser => "NEW_USER",
            Self::AlreadyMigrated => "ALREADY_MIGRATED",
        }
    }
}

impl FromStr for MigrationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "NEW_USER" => Ok(Self::NewUser),
            "ALREADY_MIGRATED" => Ok(Self::AlreadyMigrated),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JourneyState {
    PrivacyPolicyPending,
    MigratingUser,
    UserMigratedAndReady,
    UserReady,
    MigratingFindEmails,
}

impl JourneyState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrivacyPolicyPending => "PRIVACY_POLICY_PENDING",
            Self::MigratingUser => "MIGRATING_USER",
            Self::UserMigratedAndReady => "USER_MIGRATED_AND_READY",
            Self::UserReady => "USER_READY",
            Self::MigratingFindEmails => "MIGRATING_FIND_EMAILS",
        }
    }
}

impl fmt::Display for JourneyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JourneyState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIVACY_POLICY_PENDING" => Ok(Self::PrivacyPolicyPending),
            "MIGRATING_USER" => Ok(Self::MigratingUser),
            "USER_MIGRATED_AND_READY" => Ok(Self::UserMigratedAndReady),
            "USER_READY" => Ok(Self::UserReady),
            "MIGRATING_FIND_EMAILS" => Ok(Self::MigratingFindEmails),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Downstream service a user is linked into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Downstream {
    Apply,
    Find,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    /// Identity provider subject.
    pub sub: Option<String>,
    /// Subject from the previous identity scheme.
    pub cola_sub: Option<String>,
    pub email: String,
    pub roles: BTreeSet<Role>,
    pub department: Option<String>,
    pub login_journey_state: JourneyState,
    pub apply_account_migrated: MigrationStatus,
    pub find_account_migrated: MigrationStatus,
}

impl User {
    #[must_use]
    pub fn highest_role(&self) -> Option<Role> {
        highest_role(&self.roles)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.highest_role().is_some_and(Role::is_admin)
    }

    /// Legacy identity that still needs linking in Apply.
    #[must_use]
    pub fn has_unmigrated_legacy_account(&self) -> bool {
        self.cola_sub.is_some() && self.apply_account_migrated != MigrationStatus::AlreadyMigrated
    }

    #[must_use]
    pub fn migration_status(&self, target: Downstream) -> MigrationStatus {
        match target {
            Downstream::Apply => self.apply_account_migrated,
            Downstream::Find => self.find_account_migrated,
        }
    }
}

/// Fields for a user created on first login.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub sub: String,
    pub email: String,
}

/// Normalize an email for lookups and comparisons.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_role_ignores_insertion_order() {
        assert_eq!(
            highest_role(&[Role::Applicant, Role::SuperAdmin]),
            Some(Role::SuperAdmin)
        );
        assert_eq!(
            highest_role(&[Role::SuperAdmin, Role::Applicant]),
            Some(Role::SuperAdmin)
        );
        assert_eq!(highest_role(&[Role::Find, Role::Applicant]), Some(Role::Applicant));
        assert_eq!(highest_role(&Vec::<Role>::new()), None);
    }

    #[test]
    fn role_total_order() {
        assert!(Role::SuperAdmin > Role::Admin);
        assert!(Role::Admin > Role::TechnicalSupport);
        assert!(Role::TechnicalSupport > Role::Applicant);
        assert!(Role::Applicant > Role::Find);
    }

    #[test]
    fn role_parse_and_display() {
        assert_eq!("super_admin".parse::<Role>(), Ok(Role::SuperAdmin));
        assert_eq!(Role::TechnicalSupport.to_string(), "TECHNICAL_SUPPORT");
        assert_eq!(
            "OWNER".parse::<Role>(),
            Err(UnknownRole("OWNER".to_string()))
        );
        assert_eq!(Role::Admin.authority(), "ROLE_ADMIN");
    }

    #[test]
    fn role_serializes_screaming_snake() -> anyhow::Result<()> {
        let json = serde_json::to_string(&vec![Role::SuperAdmin, Role::Find])?;
        assert_eq!(json, r#"["SUPER_ADMIN","FIND"]"#);
        Ok(())
    }

    #[test]
    fn journey_state_round_trips_through_str() {
        for state in [
            JourneyState::PrivacyPolicyPending,
            JourneyState::MigratingUser,
            JourneyState::UserMigratedAndReady,
            JourneyState::UserReady,
            JourneyState::MigratingFindEmails,
        ] {
            assert_eq!(state.as_str().parse::<JourneyState>(), Ok(state));
        }
    }

    #[test]
    fn unmigrated_legacy_account() {
        let mut user = User {
            id: Uuid::new_v4(),
            sub: Some("S1".to_string()),
            cola_sub: Some("legacy".to_string()),
            email: "a@b.com".to_string(),
            roles: default_roles(),
            department: None,
            login_journey_state: JourneyState::UserReady,
            apply_account_migrated: MigrationStatus::NotStarted,
            find_account_migrated: MigrationStatus::NotStarted,
        };
        assert!(user.has_unmigrated_legacy_account());
        assert!(!user.is_admin());
        user.apply_account_migrated = MigrationStatus::AlreadyMigrated;
        assert!(!user.has_unmigrated_legacy_account());
        user.cola_sub = None;
        user.apply_account_migrated = MigrationStatus::NotStarted;
        assert!(!user.has_unmigrated_legacy_account());
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }
}
