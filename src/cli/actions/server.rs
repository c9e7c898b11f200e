use crate::{
    api::{self, AuthConfig, LegacySettings, ServiceConfig, SigningBackend},
    cli::{
        commands::{journey, legacy, oidc, session, vault as vault_args},
        globals::GlobalArgs,
    },
    journey::LandingUrls,
    jwt,
    legacy::LegacyConfig,
    oidc::{OidcConfig, Profile},
    token::{SessionConfig, purge::PurgeConfig},
    vault,
};
use anyhow::{Context, Result, anyhow};
use rsa::RsaPrivateKey;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub vault: vault_args::Options,
    pub oidc: oidc::Options,
    pub session: session::Options,
    pub journey: journey::Options,
    pub legacy: Option<legacy::Options>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the client key cannot be read, Vault login fails, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let pem = tokio::fs::read(&args.oidc.private_key_path)
        .await
        .with_context(|| format!("could not read {}", args.oidc.private_key_path))?;
    let oidc_client_key = jwt::decode_private_key(&pem)
        .map_err(|e| anyhow!("invalid OIDC client private key: {e}"))?;

    let mut globals = GlobalArgs::new(args.vault.url.clone().unwrap_or_default());

    let signing = if args.oidc.profile == Profile::Local {
        SigningBackend::Local(oidc_client_key.clone())
    } else {
        globals.set_token(vault_login(&args.vault).await?);
        debug!("Global args: {:?}", globals);
        SigningBackend::Vault {
            mount: args.vault.transit_mount.clone(),
        }
    };

    let port = args.port;
    let dsn = args.dsn.clone();
    let config = service_config(args, signing, oidc_client_key);

    api::new(port, dsn, &globals, config).await
}

/// `AppRole` login, unwrapping the secret id first when it arrives response-wrapped.
async fn vault_login(args: &vault_args::Options) -> Result<SecretString> {
    let url = args
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("Vault URL is required"))?;
    let role_id = args
        .role_id
        .as_deref()
        .ok_or_else(|| anyhow!("Vault role-id is required"))?;
    let login_url = vault::endpoint_url(url, "/v1/auth/approle/login")?;

    let secret_id = if let Some(wrapped) = &args.wrapped_token {
        vault::unwrap(url, wrapped.expose_secret()).await?
    } else {
        args.secret_id
            .as_ref()
            .map(|s| s.expose_secret().to_string())
            .ok_or_else(|| anyhow!("Vault secret-id is required"))?
    };

    let (token, _) = vault::approle_login(&login_url, &secret_id, role_id).await?;

    Ok(SecretString::from(token))
}

fn service_config(
    args: Args,
    signing: SigningBackend,
    oidc_client_key: RsaPrivateKey,
) -> ServiceConfig {
    let local = args.oidc.profile == Profile::Local;
    let post_logout_uri = args
        .oidc
        .post_logout_uri
        .unwrap_or_else(|| args.journey.frontend_base_url.clone());

    let oidc = OidcConfig::new(&args.oidc.base_url, args.oidc.client_id, args.oidc.redirect_uri)
        .with_post_logout_uri(post_logout_uri)
        .with_mfa_enabled(args.oidc.mfa_enabled)
        .with_profile(args.oidc.profile);

    let session = SessionConfig::new(args.session.issuer, args.session.audience)
        .with_expires_after_minutes(args.session.expires_after_minutes)
        .with_admin_expires_after_minutes(args.session.admin_expires_after_minutes)
        .with_managed_identity(args.session.managed_identity)
        .with_strict_role_validation(args.session.strict_role_validation)
        .with_verify_cache(
            Duration::from_secs(args.session.verify_cache_ttl_seconds),
            args.session.verify_cache_capacity,
        );

    let auth = AuthConfig::new()
        .with_session_cookie_name(args.session.cookie_name)
        .with_session_cookie_domain(args.session.cookie_domain)
        .with_cookie_secure(!local);

    let landing = LandingUrls::new(
        &args.journey.frontend_base_url,
        &args.journey.admin_base_url,
        &args.journey.applicant_base_url,
    );

    let legacy = args.legacy.map(|l| LegacySettings {
        config: LegacyConfig::new(l.cookie_name, l.cookie_secret, l.issuer, l.audience),
        jwks_url: l.jwks_url,
    });

    ServiceConfig {
        auth,
        session,
        signing_key: args.vault.signing_key,
        signing,
        oidc,
        oidc_client_key,
        landing,
        apply_api_url: args.journey.apply_api_url,
        find_api_url: args.journey.find_api_url,
        find_migration_enabled: args.journey.find_migration_enabled,
        legacy,
        purge: PurgeConfig::new(args.session.purge_interval_seconds),
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("profile", args.oidc.profile.to_string()),
        (
            "vault_url",
            args.vault.url.clone().unwrap_or_else(|| "n/a".to_string()),
        ),
        ("signing_key", args.vault.signing_key.clone()),
        ("oidc_base_url", args.oidc.base_url.clone()),
        ("oidc_client_id", args.oidc.client_id.clone()),
        ("mfa_enabled", args.oidc.mfa_enabled.to_string()),
        (
            "find_migration_enabled",
            args.journey.find_migration_enabled.to_string(),
        ),
        ("legacy_bridge", args.legacy.is_some().to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
