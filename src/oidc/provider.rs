//! Calls to the identity provider: code exchange, user info and published keys.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::OidcConfig;
use crate::{
    jwt::{self, KeySource, RemoteJwks},
    unix_now,
};

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const CLIENT_ASSERTION_TTL_SECONDS: i64 = 300;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserInfo {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// `aud` may be a single string or a list.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Client-authentication assertion (`private_key_jwt`).
#[derive(Debug, Serialize, Deserialize)]
struct ClientAssertion {
    aud: String,
    iss: String,
    sub: String,
    jti: String,
    iat: i64,
    exp: i64,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse>;

    async fn user_info(&self, access_token: &str) -> Result<UserInfo>;

    /// Keys that sign provider-issued tokens.
    fn keys(&self) -> &dyn KeySource;
}

pub struct HttpIdentityProvider {
    client: Client,
    config: OidcConfig,
    client_key: RsaPrivateKey,
    jwks: RemoteJwks,
}

impl HttpIdentityProvider {
    #[must_use]
    pub fn new(client: Client, config: OidcConfig, client_key: RsaPrivateKey) -> Self {
        let jwks = RemoteJwks::new(config.jwks_uri(), client.clone());
        Self {
            client,
            config,
            client_key,
            jwks,
        }
    }

    fn client_assertion(&self) -> Result<String> {
        let now = unix_now();
        let claims = ClientAssertion {
            aud: self.config.token_endpoint(),
            iss: self.config.client_id().to_string(),
            sub: self.config.client_id().to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + CLIENT_ASSERTION_TTL_SECONDS,
        };
        jwt::sign_rs256(&self.client_key, self.config.client_id(), &claims)
            .context("failed to sign client assertion")
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, code))]
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let assertion = self.client_assertion()?;
        let token_url = self.config.token_endpoint();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];

        let response = self.client.post(&token_url).form(&form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = provider_error_message(&text);
            error!("Token exchange failed: {status} {message}");
            return Err(anyhow!("{token_url} - {status}, {message}"));
        }

        response
            .json::<TokenResponse>()
            .await
            .context("invalid token response")
    }

    #[instrument(skip(self, access_token))]
    async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
        let userinfo_url = self.config.userinfo_endpoint();
        let response = self
            .client
            .get(&userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!("User info request failed: {status}");
            return Err(anyhow!("{userinfo_url} - {status}"));
        }

        response
            .json::<UserInfo>()
            .await
            .context("invalid user info response")
    }

    fn keys(&self) -> &dyn KeySource {
        &self.jwks
    }
}

/// `error_description` or `error` from a JSON error body, else the raw body.
fn provider_error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .get("error_description")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), ToString::to_string),
        Err(err) => {
            debug!("provider error body is not JSON: {err}");
            if body.trim().is_empty() {
                "no error description".to_string()
            } else {
                body.trim().to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::test_support::{test_jwks, test_key};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpIdentityProvider {
        let config = OidcConfig::new(
            &server.uri(),
            "client-1".to_string(),
            "https://sesame.test/redirect-after-login".to_string(),
        );
        HttpIdentityProvider::new(Client::new(), config, test_key())
    }

    #[test]
    fn audience_accepts_string_or_list() -> Result<()> {
        let one: Audience = serde_json::from_value(json!("client-1"))?;
        let many: Audience = serde_json::from_value(json!(["other", "client-1"]))?;
        assert!(one.contains("client-1"));
        assert!(many.contains("client-1"));
        assert!(!one.contains("other"));
        Ok(())
    }

    #[tokio::test]
    async fn exchange_code_authenticates_with_signed_assertion() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains(
                "client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "id_token": "id",
                "token_type": "Bearer",
                "expires_in": 180
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let tokens = provider.exchange_code("abc").await?;
        assert_eq!(tokens.access_token, "access");
        assert_eq!(tokens.id_token, "id");

        let Some(requests) = server.received_requests().await else {
            anyhow::bail!("wiremock request recording is disabled");
        };
        let body = String::from_utf8(requests[0].body.clone())?;
        let assertion = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("client_assertion="))
            .ok_or_else(|| anyhow!("client assertion missing"))?;
        let jwks = test_jwks("client-1");
        let jwk = jwks
            .find_by_kid("client-1")
            .ok_or_else(|| anyhow!("test key missing"))?;
        let claims: ClientAssertion = jwt::verify_rs256(assertion, jwk)?;
        assert_eq!(claims.aud, format!("{}/token", server.uri()));
        assert_eq!(claims.iss, "client-1");
        assert_eq!(claims.sub, "client-1");
        assert_eq!(claims.exp - claims.iat, 300);
        Ok(())
    }

    #[tokio::test]
    async fn exchange_code_surfaces_provider_errors() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let result = provider(&server).exchange_code("abc").await;
        let message = result.err().map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("invalid_grant"), "{message}");
        Ok(())
    }

    #[tokio::test]
    async fn exchange_code_keeps_non_json_error_body() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream gateway timeout"))
            .mount(&server)
            .await;

        let result = provider(&server).exchange_code("abc").await;
        let message = result.err().map(|err| err.to_string()).unwrap_or_default();
        assert!(message.contains("upstream gateway timeout"), "{message}");
        Ok(())
    }

    #[test]
    fn provider_error_message_prefers_description() {
        assert_eq!(
            provider_error_message(r#"{"error":"invalid_grant","error_description":"code expired"}"#),
            "code expired"
        );
        assert_eq!(provider_error_message(""), "no error description");
    }

    #[tokio::test]
    async fn user_info_uses_bearer_token() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("Authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "S1",
                "email": "a@b.com",
                "email_verified": true
            })))
            .mount(&server)
            .await;

        let info = provider(&server).user_info("access").await?;
        assert_eq!(info.sub, "S1");
        assert_eq!(info.email, "a@b.com");
        Ok(())
    }
}
