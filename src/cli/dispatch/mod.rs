use crate::cli::{
    actions::{Action, server::Args},
    commands::{self, journey, legacy, oidc, session, vault},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        vault: vault::Options::parse(matches)?,
        oidc: oidc::Options::parse(matches)?,
        session: session::Options::parse(matches)?,
        journey: journey::Options::parse(matches)?,
        legacy: legacy::Options::parse(matches)?,
    })))
}
