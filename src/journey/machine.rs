//! Pure transition function for the login journey.

use tracing::info;

use crate::users::{JourneyState, User, normalize_email};

/// Inputs gathered for one login or consent event.
#[derive(Clone, Debug, Default)]
pub struct JourneyContext {
    pub privacy_policy_accepted: bool,
    /// Email reported by the identity provider on this login.
    pub provider_email: Option<String>,
    /// Where the user asked to go.
    pub redirect_url: String,
}

impl JourneyContext {
    fn email_changed(&self, user: &User) -> Option<&str> {
        self.provider_email
            .as_deref()
            .filter(|email| normalize_email(email) != normalize_email(&user.email))
    }
}

/// Side effect requested by a transition, applied by the runner in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    PersistState(JourneyState),
    MigrateFind,
    MigrateApply,
    UpdateEmail(String),
    MarkApplyAlreadyMigrated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub effects: Vec<Effect>,
    pub next: JourneyState,
}

impl Transition {
    fn stay(state: JourneyState) -> Self {
        Self {
            effects: Vec::new(),
            next: state,
        }
    }
}

/// Compute the next state. `next == state` marks a fixed point.
#[must_use]
pub fn next(
    state: JourneyState,
    user: &User,
    context: &JourneyContext,
    find_migration_enabled: bool,
) -> Transition {
    match state {
        JourneyState::PrivacyPolicyPending => {
            if !context.privacy_policy_accepted {
                return Transition::stay(state);
            }
            Transition {
                effects: vec![Effect::PersistState(JourneyState::MigratingUser)],
                next: JourneyState::MigratingUser,
            }
        }
        JourneyState::MigratingUser => {
            let mut effects = Vec::new();
            if find_migration_enabled {
                effects.push(Effect::MigrateFind);
            }
            if user.has_unmigrated_legacy_account() {
                effects.push(Effect::MigrateApply);
            }
            effects.push(Effect::PersistState(if find_migration_enabled {
                JourneyState::UserMigratedAndReady
            } else {
                JourneyState::UserReady
            }));
            // The pass stays on MIGRATING_USER so the redirect uses the migrated landing.
            Transition {
                effects,
                next: JourneyState::MigratingUser,
            }
        }
        JourneyState::UserMigratedAndReady => match context.email_changed(user) {
            Some(email) => Transition {
                effects: vec![Effect::UpdateEmail(email.to_string())],
                next: JourneyState::MigratingFindEmails,
            },
            None => Transition::stay(state),
        },
        JourneyState::MigratingFindEmails => Transition::stay(state),
        JourneyState::UserReady => {
            if find_migration_enabled && user.has_unmigrated_legacy_account() {
                return Transition {
                    effects: vec![Effect::MarkApplyAlreadyMigrated],
                    next: JourneyState::MigratingUser,
                };
            }
            if !find_migration_enabled && context.email_changed(user).is_some() {
                info!(user = %user.id, "provider email changed; left unchanged while Find migration is disabled");
            }
            Transition::stay(state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{MigrationStatus, default_roles};
    use uuid::Uuid;

    fn user(state: JourneyState) -> User {
        User {
            id: Uuid::new_v4(),
            sub: Some("S1".to_string()),
            cola_sub: None,
            email: "a@b.com".to_string(),
            roles: default_roles(),
            department: None,
            login_journey_state: state,
            apply_account_migrated: MigrationStatus::NotStarted,
            find_account_migrated: MigrationStatus::NotStarted,
        }
    }

    fn context(accepted: bool, email: &str) -> JourneyContext {
        JourneyContext {
            privacy_policy_accepted: accepted,
            provider_email: Some(email.to_string()),
            redirect_url: "https://apply.test/dashboard".to_string(),
        }
    }

    #[test]
    fn pending_without_acceptance_is_a_fixed_point() {
        let u = user(JourneyState::PrivacyPolicyPending);
        let t = next(u.login_journey_state, &u, &context(false, "a@b.com"), true);
        assert_eq!(t, Transition::stay(JourneyState::PrivacyPolicyPending));
    }

    #[test]
    fn acceptance_moves_to_migration() {
        let u = user(JourneyState::PrivacyPolicyPending);
        let t = next(u.login_journey_state, &u, &context(true, "a@b.com"), true);
        assert_eq!(t.next, JourneyState::MigratingUser);
        assert_eq!(
            t.effects,
            vec![Effect::PersistState(JourneyState::MigratingUser)]
        );
    }

    #[test]
    fn migrating_user_links_both_services_for_legacy_accounts() {
        let mut u = user(JourneyState::MigratingUser);
        u.cola_sub = Some("legacy".to_string());
        let t = next(u.login_journey_state, &u, &context(true, "a@b.com"), true);
        assert_eq!(t.next, JourneyState::MigratingUser);
        assert_eq!(
            t.effects,
            vec![
                Effect::MigrateFind,
                Effect::MigrateApply,
                Effect::PersistState(JourneyState::UserMigratedAndReady)
            ]
        );
    }

    #[test]
    fn migrating_user_without_find_lands_on_user_ready() {
        let u = user(JourneyState::MigratingUser);
        let t = next(u.login_journey_state, &u, &context(true, "a@b.com"), false);
        assert_eq!(
            t.effects,
            vec![Effect::PersistState(JourneyState::UserReady)]
        );
    }

    #[test]
    fn changed_email_after_migration_is_recorded() {
        let u = user(JourneyState::UserMigratedAndReady);
        let t = next(u.login_journey_state, &u, &context(false, "new@b.com"), true);
        assert_eq!(t.next, JourneyState::MigratingFindEmails);
        assert_eq!(t.effects, vec![Effect::UpdateEmail("new@b.com".to_string())]);

        let same = next(u.login_journey_state, &u, &context(false, "A@B.com"), true);
        assert_eq!(same, Transition::stay(JourneyState::UserMigratedAndReady));
    }

    #[test]
    fn user_ready_backfills_legacy_accounts() {
        let mut u = user(JourneyState::UserReady);
        u.cola_sub = Some("legacy".to_string());
        let t = next(u.login_journey_state, &u, &context(false, "a@b.com"), true);
        assert_eq!(t.next, JourneyState::MigratingUser);
        assert_eq!(t.effects, vec![Effect::MarkApplyAlreadyMigrated]);

        let disabled = next(u.login_journey_state, &u, &context(false, "new@b.com"), false);
        assert_eq!(disabled, Transition::stay(JourneyState::UserReady));
    }

    #[test]
    fn email_updated_is_terminal() {
        let u = user(JourneyState::MigratingFindEmails);
        let t = next(u.login_journey_state, &u, &context(true, "x@b.com"), true);
        assert_eq!(t, Transition::stay(JourneyState::MigratingFindEmails));
    }
}
