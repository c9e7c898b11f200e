//! Login journey: privacy-policy consent, downstream account migration and the
//! landing page that follows.
//!
//! [`machine::next`] decides transitions and [`redirect::redirect_for`] maps the
//! settled state to a URL; [`LoginJourney`] applies the requested side effects and
//! loops until a fixed point.

pub mod machine;
pub mod migration;
pub mod redirect;

pub use machine::{Effect, JourneyContext, Transition};
pub use migration::{FindMigration, HttpMigrationClient, MigrationClient};
pub use redirect::{LandingUrls, redirect_for};

use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::{
    store::UserStore,
    users::{Downstream, JourneyState, MigrationStatus, User},
};

/// Longest chain of transitions one event can take.
const MAX_STEPS: usize = 8;

#[derive(Clone, Debug)]
pub struct JourneyOutcome {
    /// State this pass settled on, not necessarily the persisted one.
    pub state: JourneyState,
    pub redirect_url: String,
    pub user: User,
}

pub struct LoginJourney {
    users: Arc<dyn UserStore>,
    migrations: Arc<dyn MigrationClient>,
    landing: LandingUrls,
    find_migration_enabled: bool,
}

impl LoginJourney {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        migrations: Arc<dyn MigrationClient>,
        landing: LandingUrls,
        find_migration_enabled: bool,
    ) -> Self {
        Self {
            users,
            migrations,
            landing,
            find_migration_enabled,
        }
    }

    #[must_use]
    pub fn landing(&self) -> &LandingUrls {
        &self.landing
    }

    /// Run the journey for `user` and resolve the landing URL.
    ///
    /// # Errors
    /// Returns an error if the user store fails. Downstream migration failures are
    /// recorded as `FAILED` and do not abort the journey.
    pub async fn advance(&self, mut user: User, context: &JourneyContext) -> Result<JourneyOutcome> {
        let mut state = user.login_journey_state;

        for _ in 0..MAX_STEPS {
            let transition =
                machine::next(state, &user, context, self.find_migration_enabled);
            for effect in transition.effects {
                self.apply(&mut user, effect).await?;
            }
            if transition.next == state {
                debug!(user = %user.id, state = %state, "login journey settled");
                let redirect_url = redirect_for(
                    state,
                    user.highest_role(),
                    &context.redirect_url,
                    &user,
                    &self.landing,
                );
                return Ok(JourneyOutcome {
                    state,
                    redirect_url,
                    user,
                });
            }
            state = transition.next;
        }

        bail!("login journey for user {} did not settle", user.id)
    }

    async fn apply(&self, user: &mut User, effect: Effect) -> Result<()> {
        match effect {
            Effect::PersistState(state) => {
                self.users.set_journey_state(user.id, state).await?;
                user.login_journey_state = state;
            }
            Effect::MigrateFind => {
                let status = match self.migrations.migrate_find(user).await {
                    Ok(FindMigration { is_new_user: true }) => MigrationStatus::NewUser,
                    Ok(FindMigration { is_new_user: false }) => MigrationStatus::Succeeded,
                    Err(err) => {
                        error!(user = %user.id, "Find migration failed: {err:#}");
                        MigrationStatus::Failed
                    }
                };
                self.set_migration_status(user, Downstream::Find, status)
                    .await?;
            }
            Effect::MigrateApply => {
                let status = match self.migrations.migrate_apply(user).await {
                    Ok(()) => MigrationStatus::Succeeded,
                    Err(err) => {
                        error!(user = %user.id, "Apply migration failed: {err:#}");
                        MigrationStatus::Failed
                    }
                };
                self.set_migration_status(user, Downstream::Apply, status)
                    .await?;
            }
            Effect::UpdateEmail(email) => {
                warn!(user = %user.id, "provider email changed, updating stored email");
                self.users.set_email(user.id, &email).await?;
                user.email = email;
            }
            Effect::MarkApplyAlreadyMigrated => {
                self.set_migration_status(
                    user,
                    Downstream::Apply,
                    MigrationStatus::AlreadyMigrated,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn set_migration_status(
        &self,
        user: &mut User,
        target: Downstream,
        status: MigrationStatus,
    ) -> Result<()> {
        self.users
            .set_migration_status(user.id, target, status)
            .await?;
        match target {
            Downstream::Apply => user.apply_account_migrated = status,
            Downstream::Find => user.find_account_migrated = status,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUserStore;
    use crate::users::default_roles;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingMigrations {
        apply_calls: AtomicUsize,
        find_calls: AtomicUsize,
        fail_apply: bool,
    }

    #[async_trait]
    impl MigrationClient for CountingMigrations {
        async fn migrate_apply(&self, _user: &User) -> Result<()> {
            self.apply_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_apply {
                return Err(anyhow!("apply unavailable"));
            }
            Ok(())
        }

        async fn migrate_find(&self, _user: &User) -> Result<FindMigration> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            Ok(FindMigration { is_new_user: false })
        }
    }

    fn landing() -> LandingUrls {
        LandingUrls::new("https://www.test", "https://admin.test", "https://apply.test")
    }

    async fn seeded(store: &InMemoryUserStore, state: JourneyState, cola_sub: Option<&str>) -> User {
        let user = User {
            id: Uuid::new_v4(),
            sub: Some("S1".to_string()),
            cola_sub: cola_sub.map(str::to_string),
            email: "a@b.com".to_string(),
            roles: default_roles(),
            department: None,
            login_journey_state: state,
            apply_account_migrated: MigrationStatus::NotStarted,
            find_account_migrated: MigrationStatus::NotStarted,
        };
        store.insert(user.clone()).await;
        user
    }

    fn context(accepted: bool) -> JourneyContext {
        JourneyContext {
            privacy_policy_accepted: accepted,
            provider_email: Some("a@b.com".to_string()),
            redirect_url: "https://apply.test/dashboard".to_string(),
        }
    }

    #[tokio::test]
    async fn pending_user_stays_on_privacy_policy_without_migrating() -> Result<()> {
        let store = Arc::new(InMemoryUserStore::new());
        let migrations = Arc::new(CountingMigrations::default());
        let journey = LoginJourney::new(store.clone(), migrations.clone(), landing(), true);
        let user = seeded(&store, JourneyState::PrivacyPolicyPending, None).await;

        let outcome = journey.advance(user, &context(false)).await?;
        assert_eq!(outcome.state, JourneyState::PrivacyPolicyPending);
        assert_eq!(outcome.redirect_url, "https://www.test/privacy-policy");
        assert_eq!(migrations.find_calls.load(Ordering::SeqCst), 0);
        assert_eq!(migrations.apply_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn migrating_legacy_user_links_once_and_persists_ready() -> Result<()> {
        let store = Arc::new(InMemoryUserStore::new());
        let migrations = Arc::new(CountingMigrations::default());
        let journey = LoginJourney::new(store.clone(), migrations.clone(), landing(), true);
        let user = seeded(&store, JourneyState::MigratingUser, Some("C1")).await;

        let outcome = journey.advance(user.clone(), &context(false)).await?;
        assert_eq!(migrations.find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(migrations.apply_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.state, JourneyState::MigratingUser);
        assert_eq!(
            outcome.redirect_url,
            "https://apply.test/dashboard?applyMigrationStatus=SUCCEEDED&findMigrationStatus=SUCCEEDED"
        );

        let stored = store
            .get(user.id)
            .await
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(stored.login_journey_state, JourneyState::UserMigratedAndReady);
        Ok(())
    }

    #[tokio::test]
    async fn acceptance_runs_migration_in_the_same_event() -> Result<()> {
        let store = Arc::new(InMemoryUserStore::new());
        let migrations = Arc::new(CountingMigrations {
            fail_apply: true,
            ..CountingMigrations::default()
        });
        let journey = LoginJourney::new(store.clone(), migrations.clone(), landing(), false);
        let user = seeded(&store, JourneyState::PrivacyPolicyPending, Some("C1")).await;

        let outcome = journey.advance(user.clone(), &context(true)).await?;
        assert_eq!(outcome.state, JourneyState::MigratingUser);
        assert_eq!(migrations.find_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.user.apply_account_migrated, MigrationStatus::Failed);

        let stored = store
            .get(user.id)
            .await
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(stored.login_journey_state, JourneyState::UserReady);
        assert_eq!(stored.apply_account_migrated, MigrationStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn changed_email_lands_on_updated_email_page() -> Result<()> {
        let store = Arc::new(InMemoryUserStore::new());
        let migrations = Arc::new(CountingMigrations::default());
        let journey = LoginJourney::new(store.clone(), migrations, landing(), true);
        let user = seeded(&store, JourneyState::UserMigratedAndReady, None).await;

        let ctx = JourneyContext {
            provider_email: Some("new@b.com".to_string()),
            ..context(false)
        };
        let outcome = journey.advance(user.clone(), &ctx).await?;
        assert_eq!(outcome.state, JourneyState::MigratingFindEmails);
        assert_eq!(outcome.redirect_url, "https://www.test/updated-email");
        assert_eq!(store.get(user.id).await.map(|u| u.email), Some("new@b.com".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn ready_user_with_legacy_account_is_backfilled() -> Result<()> {
        let store = Arc::new(InMemoryUserStore::new());
        let migrations = Arc::new(CountingMigrations::default());
        let journey = LoginJourney::new(store.clone(), migrations.clone(), landing(), true);
        let user = seeded(&store, JourneyState::UserReady, Some("C1")).await;

        let outcome = journey.advance(user, &context(false)).await?;
        assert_eq!(outcome.state, JourneyState::MigratingUser);
        assert_eq!(
            outcome.user.apply_account_migrated,
            MigrationStatus::AlreadyMigrated
        );
        assert_eq!(migrations.find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(migrations.apply_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
