//! Map validated command-line arguments to an action.

use crate::cli::{
    actions::{server::Args, Action},
    commands::auth,
};
use anyhow::Result;
use secrecy::SecretString;

/// # Errors
/// Returns an error if an argument is missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| SecretString::from(dsn.clone()));

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        config: auth_opts.config,
        email_from: auth_opts.email_from,
        email_timeout_seconds: auth_opts.email_timeout_seconds,
        breach_check: auth_opts.breach_check,
    }))
}
