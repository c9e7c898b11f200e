//! Account linking in the downstream Apply and Find services.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::users::User;

/// Result of linking an account in Find.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindMigration {
    pub is_new_user: bool,
}

#[async_trait]
pub trait MigrationClient: Send + Sync {
    /// Link the legacy identity to the new subject in Apply.
    async fn migrate_apply(&self, user: &User) -> Result<()>;

    /// Link or create the Find account.
    async fn migrate_find(&self, user: &User) -> Result<FindMigration>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyMigrationRequest<'a> {
    one_login_sub: &'a str,
    cola_user_sub: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindMigrationRequest<'a> {
    one_login_sub: &'a str,
    email_address: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindMigrationResponse {
    is_new_user: bool,
}

pub struct HttpMigrationClient {
    client: Client,
    apply_api_url: String,
    find_api_url: String,
}

impl HttpMigrationClient {
    #[must_use]
    pub fn new(client: Client, apply_api_url: &str, find_api_url: &str) -> Self {
        Self {
            client,
            apply_api_url: apply_api_url.trim_end_matches('/').to_string(),
            find_api_url: find_api_url.trim_end_matches('/').to_string(),
        }
    }
}

fn subject(user: &User) -> Result<&str> {
    user.sub
        .as_deref()
        .ok_or_else(|| anyhow!("user {} has no subject", user.id))
}

#[async_trait]
impl MigrationClient for HttpMigrationClient {
    #[instrument(skip(self, user), fields(user = %user.id))]
    async fn migrate_apply(&self, user: &User) -> Result<()> {
        let cola_user_sub = user
            .cola_sub
            .as_deref()
            .ok_or_else(|| anyhow!("user {} has no legacy subject", user.id))?;
        let url = format!("{}/users/migrate", self.apply_api_url);
        let response = self
            .client
            .patch(&url)
            .json(&ApplyMigrationRequest {
                one_login_sub: subject(user)?,
                cola_user_sub,
            })
            .send()
            .await
            .with_context(|| format!("failed to call {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("{url} - {}", response.status()));
        }
        Ok(())
    }

    #[instrument(skip(self, user), fields(user = %user.id))]
    async fn migrate_find(&self, user: &User) -> Result<FindMigration> {
        let url = format!("{}/api/user/migrate", self.find_api_url);
        let response = self
            .client
            .patch(&url)
            .json(&FindMigrationRequest {
                one_login_sub: subject(user)?,
                email_address: &user.email,
            })
            .send()
            .await
            .with_context(|| format!("failed to call {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("{url} - {}", response.status()));
        }

        let body: FindMigrationResponse = response
            .json()
            .await
            .context("invalid Find migration response")?;
        Ok(FindMigration {
            is_new_user: body.is_new_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{JourneyState, MigrationStatus, default_roles};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            sub: Some("S1".to_string()),
            cola_sub: Some("C1".to_string()),
            email: "a@b.com".to_string(),
            roles: default_roles(),
            department: None,
            login_journey_state: JourneyState::MigratingUser,
            apply_account_migrated: MigrationStatus::NotStarted,
            find_account_migrated: MigrationStatus::NotStarted,
        }
    }

    #[tokio::test]
    async fn apply_migration_sends_both_subjects() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/users/migrate"))
            .and(body_json(json!({"oneLoginSub": "S1", "colaUserSub": "C1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpMigrationClient::new(Client::new(), &server.uri(), &server.uri());
        client.migrate_apply(&user()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn find_migration_reports_new_users() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/user/migrate"))
            .and(body_json(json!({"oneLoginSub": "S1", "emailAddress": "a@b.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isNewUser": true})))
            .mount(&server)
            .await;

        let client = HttpMigrationClient::new(Client::new(), &server.uri(), &server.uri());
        assert!(client.migrate_find(&user()).await?.is_new_user);
        Ok(())
    }

    #[tokio::test]
    async fn downstream_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpMigrationClient::new(Client::new(), &server.uri(), &server.uri());
        assert!(client.migrate_apply(&user()).await.is_err());
        assert!(client.migrate_find(&user()).await.is_err());
    }
}
