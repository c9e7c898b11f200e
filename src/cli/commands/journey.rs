use anyhow::anyhow;
use clap::{Arg, ArgMatches, Command};

pub const ARG_FIND_MIGRATION_ENABLED: &str = "find-migration-enabled";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ADMIN_BASE_URL: &str = "admin-base-url";
pub const ARG_APPLICANT_BASE_URL: &str = "applicant-base-url";
pub const ARG_APPLY_API_URL: &str = "apply-api-url";
pub const ARG_FIND_API_URL: &str = "find-api-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub find_migration_enabled: bool,
    pub frontend_base_url: String,
    pub admin_base_url: String,
    pub applicant_base_url: String,
    pub apply_api_url: String,
    pub find_api_url: String,
}

impl Options {
    /// Parse login journey arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let required = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            find_migration_enabled: matches
                .get_one::<bool>(ARG_FIND_MIGRATION_ENABLED)
                .copied()
                .unwrap_or(false),
            frontend_base_url: required(ARG_FRONTEND_BASE_URL)?,
            admin_base_url: required(ARG_ADMIN_BASE_URL)?,
            applicant_base_url: required(ARG_APPLICANT_BASE_URL)?,
            apply_api_url: required(ARG_APPLY_API_URL)?,
            find_api_url: required(ARG_FIND_API_URL)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FIND_MIGRATION_ENABLED)
                .long(ARG_FIND_MIGRATION_ENABLED)
                .help("Link users into the Find service during login")
                .env("SESAME_FIND_MIGRATION_ENABLED")
                .default_value("false")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Account frontend base URL (privacy policy and email pages)")
                .env("SESAME_FRONTEND_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_ADMIN_BASE_URL)
                .long(ARG_ADMIN_BASE_URL)
                .help("Admin frontend base URL (dashboards)")
                .env("SESAME_ADMIN_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_APPLICANT_BASE_URL)
                .long(ARG_APPLICANT_BASE_URL)
                .help("Applicant frontend base URL, also the fallback redirect")
                .env("SESAME_APPLICANT_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_APPLY_API_URL)
                .long(ARG_APPLY_API_URL)
                .help("Apply service API base URL")
                .env("SESAME_APPLY_API_URL"),
        )
        .arg(
            Arg::new(ARG_FIND_API_URL)
                .long(ARG_FIND_API_URL)
                .help("Find service API base URL")
                .env("SESAME_FIND_API_URL"),
        )
}
