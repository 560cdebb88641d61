use crate::api::handlers::auth::{AuthConfig, Environment};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_csrf_args(command);
    let command = with_rate_limit_args(command);
    with_email_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("env")
                .long("env")
                .help("Deployment environment: development, production, or test")
                .env("TODO_AUTH_ENV")
                .default_value("development"),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session lifetime in seconds")
                .env("TODO_AUTH_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("session-renewal-threshold-seconds")
                .long("session-renewal-threshold-seconds")
                .help("Renew a session once its remaining lifetime drops below this")
                .env("TODO_AUTH_SESSION_RENEWAL_THRESHOLD_SECONDS")
                .default_value("1296000")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
}

fn with_csrf_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("allowed-origins")
                .long("allowed-origins")
                .help("Comma separated origins allowed for CSRF and CORS checks")
                .env("TODO_AUTH_ALLOWED_ORIGINS")
                .value_delimiter(',')
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("csrf-token-ttl-seconds")
                .long("csrf-token-ttl-seconds")
                .help("CSRF token lifetime in seconds")
                .env("TODO_AUTH_CSRF_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("login-rate-limit")
                .long("login-rate-limit")
                .help("Login attempts per client per window")
                .env("TODO_AUTH_LOGIN_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("register-rate-limit")
                .long("register-rate-limit")
                .help("Registrations per client per window")
                .env("TODO_AUTH_REGISTER_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("verify-email-rate-limit")
                .long("verify-email-rate-limit")
                .help("Email verification requests per client per window")
                .env("TODO_AUTH_VERIFY_EMAIL_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("rate-limit-window-seconds")
                .long("rate-limit-window-seconds")
                .help("Sliding window length in seconds")
                .env("TODO_AUTH_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_email_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-verification-ttl-seconds")
                .long("email-verification-ttl-seconds")
                .help("Verification code lifetime in seconds")
                .env("TODO_AUTH_EMAIL_VERIFICATION_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("email-from")
                .long("email-from")
                .help("Sender address for verification emails")
                .env("TODO_AUTH_EMAIL_FROM")
                .default_value("no-reply@todo.local"),
        )
        .arg(
            Arg::new("email-timeout-seconds")
                .long("email-timeout-seconds")
                .help("Give up on a verification email after this many seconds")
                .env("TODO_AUTH_EMAIL_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("disable-breach-check")
                .long("disable-breach-check")
                .help("Skip the Have I Been Pwned password lookup")
                .env("TODO_AUTH_DISABLE_BREACH_CHECK")
                .action(ArgAction::SetTrue),
        )
}

/// Auth settings read from validated matches.
#[derive(Debug, Clone)]
pub struct Options {
    pub config: AuthConfig,
    pub email_from: String,
    pub email_timeout_seconds: u64,
    pub breach_check: bool,
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

impl Options {
    /// # Errors
    /// Returns an error if an argument is missing or the environment is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let environment: Environment = required::<String>(matches, "env")?
            .parse()
            .context("invalid TODO_AUTH_ENV")?;

        let allowed_origins: Vec<String> = matches
            .get_many::<String>("allowed-origins")
            .map(|origins| {
                origins
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = AuthConfig::new(allowed_origins)
            .with_environment(environment)
            .with_session_ttl_seconds(required(matches, "session-ttl-seconds")?)
            .with_session_renewal_threshold_seconds(required(
                matches,
                "session-renewal-threshold-seconds",
            )?)
            .with_email_verification_ttl_seconds(required(
                matches,
                "email-verification-ttl-seconds",
            )?)
            .with_csrf_token_ttl_seconds(required(matches, "csrf-token-ttl-seconds")?)
            .with_login_rate_limit(required(matches, "login-rate-limit")?)
            .with_register_rate_limit(required(matches, "register-rate-limit")?)
            .with_verify_email_rate_limit(required(matches, "verify-email-rate-limit")?)
            .with_rate_limit_window_seconds(required(matches, "rate-limit-window-seconds")?);

        Ok(Self {
            config,
            email_from: required(matches, "email-from")?,
            email_timeout_seconds: required(matches, "email-timeout-seconds")?,
            breach_check: !matches.get_flag("disable-breach-check"),
        })
    }
}
