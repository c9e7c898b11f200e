use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";
pub const ARG_VAULT_TRANSIT_MOUNT: &str = "vault-transit-mount";
pub const ARG_SIGNING_KEY: &str = "signing-key";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<SecretString>,
    pub wrapped_token: Option<SecretString>,
    pub transit_mount: String,
    pub signing_key: String,
}

impl Options {
    /// Parse Vault arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            url: get_non_empty(ARG_VAULT_URL),
            role_id: get_non_empty(ARG_VAULT_ROLE_ID),
            secret_id: get_non_empty(ARG_VAULT_SECRET_ID).map(SecretString::from),
            wrapped_token: get_non_empty(ARG_VAULT_WRAPPED_TOKEN).map(SecretString::from),
            transit_mount: get_non_empty(ARG_VAULT_TRANSIT_MOUNT)
                .ok_or_else(|| anyhow::anyhow!("missing argument: --{ARG_VAULT_TRANSIT_MOUNT}"))?,
            signing_key: get_non_empty(ARG_SIGNING_KEY)
                .ok_or_else(|| anyhow::anyhow!("missing argument: --{ARG_SIGNING_KEY}"))?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault base URL (http(s)://host:port)")
                .long_help(
                    "Vault base URL (http(s)://host:port). Required unless --profile=local, in which case session tokens are signed in-process.",
                )
                .env("SESAME_VAULT_URL"),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault AppRole role id")
                .env("SESAME_VAULT_ROLE_ID"),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault AppRole secret id")
                .env("SESAME_VAULT_SECRET_ID")
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Vault response-wrapped secret id")
                .env("SESAME_VAULT_WRAPPED_TOKEN"),
        )
        .arg(
            Arg::new(ARG_VAULT_TRANSIT_MOUNT)
                .long(ARG_VAULT_TRANSIT_MOUNT)
                .help("Vault transit engine mount path")
                .env("SESAME_VAULT_TRANSIT_MOUNT")
                .default_value("transit"),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("Transit key used to sign session tokens")
                .env("SESAME_SIGNING_KEY")
                .default_value("sesame-session"),
        )
}
