use anyhow::anyhow;
use clap::{Arg, ArgMatches, Command};

pub const ARG_SESSION_COOKIE_NAME: &str = "session-cookie-name";
pub const ARG_SESSION_COOKIE_DOMAIN: &str = "session-cookie-domain";
pub const ARG_TOKEN_EXPIRES_AFTER: &str = "token-expires-after";
pub const ARG_ADMIN_TOKEN_EXPIRES_AFTER: &str = "admin-token-expires-after";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_AUDIENCE: &str = "token-audience";
pub const ARG_MANAGED_IDENTITY: &str = "managed-identity";
pub const ARG_STRICT_ROLE_VALIDATION: &str = "strict-role-validation";
pub const ARG_VERIFY_CACHE_TTL_SECONDS: &str = "verify-cache-ttl-seconds";
pub const ARG_VERIFY_CACHE_CAPACITY: &str = "verify-cache-capacity";
pub const ARG_PURGE_INTERVAL_SECONDS: &str = "purge-interval-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub expires_after_minutes: i64,
    pub admin_expires_after_minutes: i64,
    pub issuer: String,
    pub audience: String,
    pub managed_identity: bool,
    pub strict_role_validation: bool,
    pub verify_cache_ttl_seconds: u64,
    pub verify_cache_capacity: u64,
    pub purge_interval_seconds: u64,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let string = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let number = |id: &str| {
            matches
                .get_one::<u64>(id)
                .copied()
                .ok_or_else(|| anyhow!("missing argument: --{id}"))
        };
        let minutes = |id: &str| {
            matches
                .get_one::<i64>(id)
                .copied()
                .ok_or_else(|| anyhow!("missing argument: --{id}"))
        };
        let flag = |id: &str| matches.get_one::<bool>(id).copied().unwrap_or(false);

        Ok(Self {
            cookie_name: string(ARG_SESSION_COOKIE_NAME)
                .ok_or_else(|| anyhow!("missing argument: --{ARG_SESSION_COOKIE_NAME}"))?,
            cookie_domain: string(ARG_SESSION_COOKIE_DOMAIN),
            expires_after_minutes: minutes(ARG_TOKEN_EXPIRES_AFTER)?,
            admin_expires_after_minutes: minutes(ARG_ADMIN_TOKEN_EXPIRES_AFTER)?,
            issuer: string(ARG_TOKEN_ISSUER)
                .ok_or_else(|| anyhow!("missing argument: --{ARG_TOKEN_ISSUER}"))?,
            audience: string(ARG_TOKEN_AUDIENCE)
                .ok_or_else(|| anyhow!("missing argument: --{ARG_TOKEN_AUDIENCE}"))?,
            managed_identity: flag(ARG_MANAGED_IDENTITY),
            strict_role_validation: flag(ARG_STRICT_ROLE_VALIDATION),
            verify_cache_ttl_seconds: number(ARG_VERIFY_CACHE_TTL_SECONDS)?,
            verify_cache_capacity: number(ARG_VERIFY_CACHE_CAPACITY)?,
            purge_interval_seconds: number(ARG_PURGE_INTERVAL_SECONDS)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_cookie_args(command);
    let command = with_token_args(command);
    with_maintenance_args(command)
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_COOKIE_NAME)
                .long(ARG_SESSION_COOKIE_NAME)
                .help("Name of the session cookie")
                .env("SESAME_SESSION_COOKIE_NAME")
                .default_value("user-service-token"),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_DOMAIN)
                .long(ARG_SESSION_COOKIE_DOMAIN)
                .help("Domain attribute of the session cookie")
                .env("SESAME_SESSION_COOKIE_DOMAIN"),
        )
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_EXPIRES_AFTER)
                .long(ARG_TOKEN_EXPIRES_AFTER)
                .help("Session lifetime in minutes")
                .env("SESAME_TOKEN_EXPIRES_AFTER")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_ADMIN_TOKEN_EXPIRES_AFTER)
                .long(ARG_ADMIN_TOKEN_EXPIRES_AFTER)
                .help("Session lifetime in minutes for admin roles")
                .env("SESAME_ADMIN_TOKEN_EXPIRES_AFTER")
                .default_value("720")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer (iss) written into session tokens")
                .env("SESAME_TOKEN_ISSUER")
                .default_value("sesame"),
        )
        .arg(
            Arg::new(ARG_TOKEN_AUDIENCE)
                .long(ARG_TOKEN_AUDIENCE)
                .help("Audience (aud) written into session tokens")
                .env("SESAME_TOKEN_AUDIENCE")
                .default_value("grants"),
        )
        .arg(
            Arg::new(ARG_MANAGED_IDENTITY)
                .long(ARG_MANAGED_IDENTITY)
                .help("Check the user record on every verification")
                .env("SESAME_MANAGED_IDENTITY")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_STRICT_ROLE_VALIDATION)
                .long(ARG_STRICT_ROLE_VALIDATION)
                .help("Reject sessions whose roles differ from the stored roles")
                .env("SESAME_STRICT_ROLE_VALIDATION")
                .default_value("false")
                .value_parser(clap::value_parser!(bool)),
        )
}

fn with_maintenance_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERIFY_CACHE_TTL_SECONDS)
                .long(ARG_VERIFY_CACHE_TTL_SECONDS)
                .help("How long a signature check is memoized")
                .env("SESAME_VERIFY_CACHE_TTL_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_VERIFY_CACHE_CAPACITY)
                .long(ARG_VERIFY_CACHE_CAPACITY)
                .help("Maximum memoized signature checks")
                .env("SESAME_VERIFY_CACHE_CAPACITY")
                .default_value("10000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_PURGE_INTERVAL_SECONDS)
                .long(ARG_PURGE_INTERVAL_SECONDS)
                .help("Interval between purges of expired revocations")
                .env("SESAME_PURGE_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}
