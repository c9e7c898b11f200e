//! Landing URL lookup per journey state and role.

use url::Url;

use crate::users::{Downstream, JourneyState, Role, User};

#[derive(Clone, Debug)]
pub struct LandingUrls {
    pub frontend: String,
    pub admin: String,
    pub applicant: String,
}

impl LandingUrls {
    #[must_use]
    pub fn new(frontend: &str, admin: &str, applicant: &str) -> Self {
        Self {
            frontend: frontend.trim_end_matches('/').to_string(),
            admin: admin.trim_end_matches('/').to_string(),
            applicant: applicant.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn privacy_policy(&self) -> String {
        format!("{}/privacy-policy", self.frontend)
    }

    #[must_use]
    pub fn updated_email(&self) -> String {
        format!("{}/updated-email", self.frontend)
    }

    /// Role-specific not-found page.
    #[must_use]
    pub fn not_found(&self, role: Option<Role>) -> String {
        if role.is_some_and(Role::is_admin) {
            format!("{}/404", self.admin)
        } else {
            format!("{}/404", self.applicant)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Landing {
    /// Path under the admin base URL.
    Admin(&'static str),
    /// The URL the user originally asked for.
    Requested,
}

const READY_LANDINGS: [(Role, Landing); 5] = [
    (Role::SuperAdmin, Landing::Admin("/super-admin-dashboard")),
    (Role::Admin, Landing::Admin("/dashboard")),
    (
        Role::TechnicalSupport,
        Landing::Admin("/technical-support-dashboard"),
    ),
    (Role::Applicant, Landing::Requested),
    (Role::Find, Landing::Requested),
];

const MIGRATED_LANDINGS: [(Role, Landing); 5] = [
    (
        Role::SuperAdmin,
        Landing::Admin("/super-admin-dashboard-migrated"),
    ),
    (Role::Admin, Landing::Admin("/dashboard-migrated")),
    (
        Role::TechnicalSupport,
        Landing::Admin("/technical-support-dashboard-migrated"),
    ),
    (Role::Applicant, Landing::Requested),
    (Role::Find, Landing::Requested),
];

fn landing(table: &[(Role, Landing)], role: Option<Role>) -> Landing {
    let role = role.unwrap_or(Role::Find);
    table
        .iter()
        .find(|(candidate, _)| *candidate == role)
        .map_or(Landing::Requested, |(_, landing)| *landing)
}

/// Resolve where the user goes once the journey has settled on `state`.
#[must_use]
pub fn redirect_for(
    state: JourneyState,
    highest_role: Option<Role>,
    pending_redirect_url: &str,
    user: &User,
    urls: &LandingUrls,
) -> String {
    let resolve = |landing: Landing| match landing {
        Landing::Admin(path) => format!("{}{path}", urls.admin),
        Landing::Requested => pending_redirect_url.to_string(),
    };

    match state {
        JourneyState::PrivacyPolicyPending => urls.privacy_policy(),
        JourneyState::MigratingFindEmails => urls.updated_email(),
        JourneyState::UserReady | JourneyState::UserMigratedAndReady => {
            resolve(landing(&READY_LANDINGS, highest_role))
        }
        JourneyState::MigratingUser => with_query(
            &resolve(landing(&MIGRATED_LANDINGS, highest_role)),
            &[
                (
                    "applyMigrationStatus",
                    user.migration_status(Downstream::Apply).as_str(),
                ),
                (
                    "findMigrationStatus",
                    user.migration_status(Downstream::Find).as_str(),
                ),
            ],
        ),
    }
}

fn with_query(url: &str, pairs: &[(&str, &str)]) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().extend_pairs(pairs);
            parsed.to_string()
        }
        Err(_) => {
            let query = pairs
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{query}")
        }
    }
}
