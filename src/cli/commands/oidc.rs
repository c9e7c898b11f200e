use anyhow::anyhow;
use clap::{Arg, ArgMatches, Command};

use crate::oidc::Profile;

pub const ARG_OIDC_BASE_URL: &str = "oidc-base-url";
pub const ARG_OIDC_CLIENT_ID: &str = "oidc-client-id";
pub const ARG_OIDC_REDIRECT_URI: &str = "oidc-redirect-uri";
pub const ARG_OIDC_PRIVATE_KEY: &str = "oidc-private-key";
pub const ARG_OIDC_POST_LOGOUT_URI: &str = "oidc-post-logout-uri";
pub const ARG_OIDC_MFA_ENABLED: &str = "oidc-mfa-enabled";
pub const ARG_PROFILE: &str = "profile";

#[derive(Debug, Clone)]
pub struct Options {
    pub base_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    /// PEM file holding the client-assertion key.
    pub private_key_path: String,
    pub post_logout_uri: Option<String>,
    pub mfa_enabled: bool,
    pub profile: Profile,
}

impl Options {
    /// Parse identity provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let required = |id: &str| {
            get_non_empty(id).ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            base_url: required(ARG_OIDC_BASE_URL)?,
            client_id: required(ARG_OIDC_CLIENT_ID)?,
            redirect_uri: required(ARG_OIDC_REDIRECT_URI)?,
            private_key_path: required(ARG_OIDC_PRIVATE_KEY)?,
            post_logout_uri: get_non_empty(ARG_OIDC_POST_LOGOUT_URI),
            mfa_enabled: matches
                .get_one::<bool>(ARG_OIDC_MFA_ENABLED)
                .copied()
                .unwrap_or(true),
            profile: matches
                .get_one::<Profile>(ARG_PROFILE)
                .copied()
                .unwrap_or_default(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OIDC_BASE_URL)
                .long(ARG_OIDC_BASE_URL)
                .help("Identity provider base URL")
                .env("SESAME_OIDC_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_OIDC_CLIENT_ID)
                .long(ARG_OIDC_CLIENT_ID)
                .help("Client id registered with the identity provider")
                .env("SESAME_OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_OIDC_REDIRECT_URI)
                .long(ARG_OIDC_REDIRECT_URI)
                .help("Callback URL registered with the identity provider")
                .env("SESAME_OIDC_REDIRECT_URI"),
        )
        .arg(
            Arg::new(ARG_OIDC_PRIVATE_KEY)
                .long(ARG_OIDC_PRIVATE_KEY)
                .help("Path to the PEM private key used for private_key_jwt client assertions")
                .env("SESAME_OIDC_PRIVATE_KEY"),
        )
        .arg(
            Arg::new(ARG_OIDC_POST_LOGOUT_URI)
                .long(ARG_OIDC_POST_LOGOUT_URI)
                .help("Where the identity provider sends the browser after logout")
                .long_help(
                    "Where the identity provider sends the browser after logout. Defaults to the frontend base URL.",
                )
                .env("SESAME_OIDC_POST_LOGOUT_URI"),
        )
        .arg(
            Arg::new(ARG_OIDC_MFA_ENABLED)
                .long(ARG_OIDC_MFA_ENABLED)
                .help("Request the MFA vector of trust")
                .env("SESAME_OIDC_MFA_ENABLED")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_PROFILE)
                .long(ARG_PROFILE)
                .help("Deployment profile: default or local")
                .long_help(
                    "Deployment profile. `local` relaxes provider checks for the stub identity provider, signs session tokens in-process and drops the Secure cookie attribute.",
                )
                .env("SESAME_PROFILE")
                .default_value("default")
                .value_parser(|value: &str| value.parse::<Profile>()),
        )
}
