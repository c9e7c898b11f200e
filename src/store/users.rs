//! User records.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::db_span;
use crate::users::{
    Downstream, JourneyState, MigrationStatus, NewUser, Role, User, default_roles,
    normalize_email,
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_sub(&self, sub: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Create a user with the default roles in `PRIVACY_POLICY_PENDING`.
    async fn create(&self, new_user: NewUser) -> Result<User>;

    async fn set_sub(&self, id: Uuid, sub: &str) -> Result<()>;

    async fn set_email(&self, id: Uuid, email: &str) -> Result<()>;

    async fn set_journey_state(&self, id: Uuid, state: JourneyState) -> Result<()>;

    async fn set_migration_status(
        &self,
        id: Uuid,
        target: Downstream,
        status: MigrationStatus,
    ) -> Result<()>;

    /// Resolve by subject first, then by email.
    async fn resolve(&self, sub: &str, email: &str) -> Result<Option<User>> {
        if let Some(user) = self.find_by_sub(sub).await? {
            return Ok(Some(user));
        }
        self.find_by_email(email).await
    }
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, sub, cola_sub, email, roles, department, login_journey_state, \
     apply_account_migrated, find_account_migrated";

fn user_from_row(row: &PgRow) -> Result<User> {
    let roles: Vec<String> = row.get("roles");
    let roles = roles
        .iter()
        .map(|role| role.parse::<Role>())
        .collect::<Result<BTreeSet<_>, _>>()?;
    let state: String = row.get("login_journey_state");
    let apply: String = row.get("apply_account_migrated");
    let find: String = row.get("find_account_migrated");

    Ok(User {
        id: row.get("id"),
        sub: row.get("sub"),
        cola_sub: row.get("cola_sub"),
        email: row.get("email"),
        roles,
        department: row.get("department"),
        login_journey_state: state.parse()?,
        apply_account_migrated: apply.parse()?,
        find_account_migrated: find.parse()?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_sub(&self, sub: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE sub = $1");
        let row = sqlx::query(&query)
            .bind(sub)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "SELECT .. FROM users WHERE sub = $1"))
            .await
            .context("failed to lookup user by sub")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = $1");
        let row = sqlx::query(&query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(db_span(
                "SELECT",
                "SELECT .. FROM users WHERE lower(email) = $1",
            ))
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let query = format!(
            "INSERT INTO users (id, sub, email, roles) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        let roles: Vec<String> = default_roles()
            .iter()
            .map(|role| role.as_str().to_string())
            .collect();
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&new_user.sub)
            .bind(normalize_email(&new_user.email))
            .bind(roles)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", "INSERT INTO users .. RETURNING .."))
            .await
            .context("failed to insert user")?;
        user_from_row(&row)
    }

    async fn set_sub(&self, id: Uuid, sub: &str) -> Result<()> {
        let query = "UPDATE users SET sub = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(sub)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update user sub")?;
        Ok(())
    }

    async fn set_email(&self, id: Uuid, email: &str) -> Result<()> {
        let query = "UPDATE users SET email = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(normalize_email(email))
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update user email")?;
        Ok(())
    }

    async fn set_journey_state(&self, id: Uuid, state: JourneyState) -> Result<()> {
        let query = "UPDATE users SET login_journey_state = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update login journey state")?;
        Ok(())
    }

    async fn set_migration_status(
        &self,
        id: Uuid,
        target: Downstream,
        status: MigrationStatus,
    ) -> Result<()> {
        let query = match target {
            Downstream::Apply => {
                "UPDATE users SET apply_account_migrated = $2, updated_at = NOW() WHERE id = $1"
            }
            Downstream::Find => {
                "UPDATE users SET find_account_migrated = $2, updated_at = NOW() WHERE id = $1"
            }
        };
        sqlx::query(query)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update migration status")?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user record.
    pub async fn insert(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }

    pub async fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().await.get(&id).cloned()
    }

    async fn update(&self, id: Uuid, apply: impl FnOnce(&mut User) + Send) -> Result<()> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow!("user not found: {id}"))?;
        apply(user);
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_sub(&self, sub: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| user.sub.as_deref() == Some(sub))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| normalize_email(&user.email) == email)
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            sub: Some(new_user.sub),
            cola_sub: None,
            email: normalize_email(&new_user.email),
            roles: default_roles(),
            department: None,
            login_journey_state: JourneyState::PrivacyPolicyPending,
            apply_account_migrated: MigrationStatus::NotStarted,
            find_account_migrated: MigrationStatus::NotStarted,
        };
        self.users.lock().await.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_sub(&self, id: Uuid, sub: &str) -> Result<()> {
        let sub = sub.to_string();
        self.update(id, move |user| user.sub = Some(sub)).await
    }

    async fn set_email(&self, id: Uuid, email: &str) -> Result<()> {
        let email = normalize_email(email);
        self.update(id, move |user| user.email = email).await
    }

    async fn set_journey_state(&self, id: Uuid, state: JourneyState) -> Result<()> {
        self.update(id, move |user| user.login_journey_state = state)
            .await
    }

    async fn set_migration_status(
        &self,
        id: Uuid,
        target: Downstream,
        status: MigrationStatus,
    ) -> Result<()> {
        self.update(id, move |user| match target {
            Downstream::Apply => user.apply_account_migrated = status,
            Downstream::Find => user.find_account_migrated = status,
        })
        .await
    }
}
