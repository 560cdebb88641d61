//! Auth state and configuration.

use anyhow::{anyhow, Result};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use super::{
    csrf::CsrfGuard,
    password::PasswordChecker,
    rate_limit::RateLimiters,
    service::AuthService,
    session::SessionManager,
    storage::Store,
};
use crate::api::email::EmailDispatcher;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_SESSION_RENEWAL_THRESHOLD_SECONDS: i64 = 15 * 24 * 60 * 60;
const DEFAULT_EMAIL_VERIFICATION_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_CSRF_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_RATE_LIMIT: u32 = 5;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
    /// Fixed verification code `TEST`.
    Test,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(anyhow!("unknown environment: {other}")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        })
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    session_ttl_seconds: i64,
    session_renewal_threshold_seconds: i64,
    email_verification_ttl_seconds: i64,
    csrf_token_ttl_seconds: u64,
    allowed_origins: Vec<String>,
    login_rate_limit: u32,
    register_rate_limit: u32,
    verify_email_rate_limit: u32,
    rate_limit_window_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self {
            environment: Environment::default(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            session_renewal_threshold_seconds: DEFAULT_SESSION_RENEWAL_THRESHOLD_SECONDS,
            email_verification_ttl_seconds: DEFAULT_EMAIL_VERIFICATION_TTL_SECONDS,
            csrf_token_ttl_seconds: DEFAULT_CSRF_TOKEN_TTL_SECONDS,
            allowed_origins,
            login_rate_limit: DEFAULT_RATE_LIMIT,
            register_rate_limit: DEFAULT_RATE_LIMIT,
            verify_email_rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_renewal_threshold_seconds(mut self, seconds: i64) -> Self {
        self.session_renewal_threshold_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_verification_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_csrf_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.csrf_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_rate_limit(mut self, limit: u32) -> Self {
        self.login_rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_register_rate_limit(mut self, limit: u32) -> Self {
        self.register_rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_verify_email_rate_limit(mut self, limit: u32) -> Self {
        self.verify_email_rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_rate_limit_window_seconds(mut self, seconds: u64) -> Self {
        self.rate_limit_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn session_renewal_threshold_seconds(&self) -> i64 {
        self.session_renewal_threshold_seconds
    }

    #[must_use]
    pub fn email_verification_ttl_seconds(&self) -> i64 {
        self.email_verification_ttl_seconds
    }

    #[must_use]
    pub fn csrf_token_ttl_seconds(&self) -> u64 {
        self.csrf_token_ttl_seconds
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn login_rate_limit(&self) -> u32 {
        self.login_rate_limit
    }

    #[must_use]
    pub fn register_rate_limit(&self) -> u32 {
        self.register_rate_limit
    }

    #[must_use]
    pub fn verify_email_rate_limit(&self) -> u32 {
        self.verify_email_rate_limit
    }

    #[must_use]
    pub fn rate_limit_window_seconds(&self) -> u64 {
        self.rate_limit_window_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    service: AuthService,
    csrf: Arc<CsrfGuard>,
    limiters: RateLimiters,
}

impl AuthState {
    /// Wire the session manager, CSRF guard, limiters, and auth service.
    ///
    /// # Errors
    /// Returns an error if an allowed origin cannot be parsed.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn Store>,
        checker: Arc<dyn PasswordChecker>,
        email: EmailDispatcher,
    ) -> Result<Self> {
        let csrf = CsrfGuard::new(config.allowed_origins())?
            .with_token_ttl(Duration::from_secs(config.csrf_token_ttl_seconds()));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            config.session_ttl_seconds(),
            config.session_renewal_threshold_seconds(),
        ));
        let service = AuthService::new(
            store.clone(),
            sessions.clone(),
            checker,
            email,
            config.environment(),
            config.email_verification_ttl_seconds(),
        );
        let limiters = RateLimiters::from_config(&config);

        Ok(Self {
            config,
            store,
            sessions,
            service,
            csrf: Arc::new(csrf),
            limiters,
        })
    }

    #[must_use]
    pub fn with_rate_limiters(mut self, limiters: RateLimiters) -> Self {
        self.limiters = limiters;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn service(&self) -> &AuthService {
        &self.service
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub(super) fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }
}
