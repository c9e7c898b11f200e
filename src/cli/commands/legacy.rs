use anyhow::anyhow;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_LEGACY_COOKIE_NAME: &str = "legacy-cookie-name";
pub const ARG_LEGACY_COOKIE_SECRET: &str = "legacy-cookie-secret";
pub const ARG_LEGACY_JWKS_URL: &str = "legacy-jwks-url";
pub const ARG_LEGACY_ISSUER: &str = "legacy-issuer";
pub const ARG_LEGACY_AUDIENCE: &str = "legacy-audience";

/// Legacy cookie bridge settings; absent when the bridge is disabled.
#[derive(Debug, Clone)]
pub struct Options {
    pub cookie_name: String,
    pub cookie_secret: SecretString,
    pub jwks_url: String,
    pub issuer: String,
    pub audience: String,
}

impl Options {
    /// Parse legacy bridge arguments; `None` unless `--legacy-cookie-name` is set.
    ///
    /// # Errors
    /// Returns an error if the cookie name is set without the rest of the bridge settings.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Option<Self>> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let Some(cookie_name) = get_non_empty(ARG_LEGACY_COOKIE_NAME) else {
            return Ok(None);
        };
        let required = |id: &str| {
            get_non_empty(id).ok_or_else(|| {
                anyhow!("missing required argument: --{id} (required by --{ARG_LEGACY_COOKIE_NAME})")
            })
        };

        Ok(Some(Self {
            cookie_name,
            cookie_secret: SecretString::from(required(ARG_LEGACY_COOKIE_SECRET)?),
            jwks_url: required(ARG_LEGACY_JWKS_URL)?,
            issuer: required(ARG_LEGACY_ISSUER)?,
            audience: required(ARG_LEGACY_AUDIENCE)?,
        }))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LEGACY_COOKIE_NAME)
                .long(ARG_LEGACY_COOKIE_NAME)
                .help("Cookie carrying sessions from the previous identity scheme")
                .long_help(
                    "Cookie carrying sessions from the previous identity scheme. Setting it enables the legacy bridge and makes the other --legacy-* arguments required.",
                )
                .env("SESAME_LEGACY_COOKIE_NAME"),
        )
        .arg(
            Arg::new(ARG_LEGACY_COOKIE_SECRET)
                .long(ARG_LEGACY_COOKIE_SECRET)
                .help("Shared secret for the legacy cookie outer signature")
                .env("SESAME_LEGACY_COOKIE_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_LEGACY_JWKS_URL)
                .long(ARG_LEGACY_JWKS_URL)
                .help("JWKS URL of the previous identity scheme")
                .env("SESAME_LEGACY_JWKS_URL"),
        )
        .arg(
            Arg::new(ARG_LEGACY_ISSUER)
                .long(ARG_LEGACY_ISSUER)
                .help("Expected issuer of legacy tokens")
                .env("SESAME_LEGACY_ISSUER"),
        )
        .arg(
            Arg::new(ARG_LEGACY_AUDIENCE)
                .long(ARG_LEGACY_AUDIENCE)
                .help("Expected audience of legacy tokens")
                .env("SESAME_LEGACY_AUDIENCE"),
        )
}
