use crate::{
    APP_USER_AGENT,
    cli::globals::GlobalArgs,
    journey::{HttpMigrationClient, LandingUrls, LoginJourney},
    jwt::RemoteJwks,
    legacy::{LegacyConfig, LegacyTokenBridge},
    oidc::{HttpIdentityProvider, LoginOrchestrator, OidcConfig, ReplayGuard},
    store::{PgReplayStore, PgRevocationStore, PgUserStore, ReplayStore, UserStore},
    token::{
        LocalRsaSigner, SessionConfig, SessionTokenService, TokenSigner, VaultTransitSigner,
        purge::{self, PurgeConfig},
    },
    vault,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    middleware,
};
use reqwest::Client;
use rsa::RsaPrivateKey;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod handlers;
mod openapi;

pub use handlers::auth::{AuthConfig, AuthState, Principal};
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Where session tokens get signed.
pub enum SigningBackend {
    /// In-process key, for the `local` profile.
    Local(RsaPrivateKey),
    /// Vault transit engine mounted at `mount`.
    Vault { mount: String },
}

pub struct LegacySettings {
    pub config: LegacyConfig,
    pub jwks_url: String,
}

/// Everything the server needs beyond the listener and database.
pub struct ServiceConfig {
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub signing_key: String,
    pub signing: SigningBackend,
    pub oidc: OidcConfig,
    pub oidc_client_key: RsaPrivateKey,
    pub landing: LandingUrls,
    pub apply_api_url: String,
    pub find_api_url: String,
    pub find_migration_enabled: bool,
    pub legacy: Option<LegacySettings>,
    pub purge: PurgeConfig,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs, config: ServiceConfig) -> Result<()> {
    // Renew vault token, gracefully shutdown if failed
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let client = Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    let signer: Arc<dyn TokenSigner> = match config.signing {
        SigningBackend::Local(key) => {
            info!("Signing session tokens in-process (local profile)");
            Arc::new(LocalRsaSigner::new(config.signing_key, key))
        }
        SigningBackend::Vault { mount } => {
            vault::renew::try_renew(globals, tx.clone()).await?;
            Arc::new(VaultTransitSigner::new(
                client.clone(),
                globals.vault_url.clone(),
                globals.vault_token.clone(),
                mount,
                config.signing_key,
            ))
        }
    };

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));
    let replay_store: Arc<dyn ReplayStore> = Arc::new(PgReplayStore::new(pool.clone()));
    let tokens = Arc::new(SessionTokenService::new(
        config.session,
        signer,
        Arc::new(PgRevocationStore::new(pool.clone())),
        users.clone(),
    ));

    let journey = Arc::new(LoginJourney::new(
        users.clone(),
        Arc::new(HttpMigrationClient::new(
            client.clone(),
            &config.apply_api_url,
            &config.find_api_url,
        )),
        config.landing,
        config.find_migration_enabled,
    ));

    let provider = Arc::new(HttpIdentityProvider::new(
        client.clone(),
        config.oidc.clone(),
        config.oidc_client_key,
    ));
    let login = Arc::new(LoginOrchestrator::new(
        config.oidc,
        provider,
        ReplayGuard::new(replay_store.clone()),
        users.clone(),
        tokens.clone(),
        journey.clone(),
    ));

    let mut auth_state = AuthState::new(config.auth, tokens.clone(), login, journey, users);
    if let Some(legacy) = config.legacy {
        let keys = Arc::new(RemoteJwks::new(legacy.jwks_url, client.clone()));
        auth_state = auth_state.with_legacy(Arc::new(LegacyTokenBridge::new(legacy.config, keys)));
    }

    // Background worker drops expired revocations and stale nonce/salt rows.
    purge::spawn_purge_worker(tokens, replay_store, config.purge);

    let app = app(Arc::new(auth_state))?.layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Router with every layer except the database pool.
///
/// # Errors
/// Returns an error if the frontend base URL cannot form a CORS origin.
pub fn app(auth_state: Arc<AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(&auth_state.journey().landing().frontend)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (router, openapi) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(middleware::from_fn(handlers::auth::auth_filter)),
        );

    Ok(app)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_drops_path() -> Result<()> {
        let origin = frontend_origin("https://www.grants.test:8443/apply/")?;
        assert_eq!(origin.to_str()?, "https://www.grants.test:8443");
        Ok(())
    }

    #[test]
    fn frontend_origin_requires_host() {
        assert!(frontend_origin("not a url").is_err());
        assert!(frontend_origin("unix:/run/sesame.sock").is_err());
    }
}
