use crate::{
    api::{
        self,
        email::{EmailDispatcher, LogEmailSender},
        handlers::auth::{
            AuthConfig, AuthState, HibpChecker, MemoryStore, NoBreachCheck, PasswordChecker,
            PgStore, Store,
        },
    },
    cli::telemetry,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub config: AuthConfig,
    pub email_from: String,
    pub email_timeout_seconds: u64,
    pub breach_check: bool,
}

async fn connect_store(dsn: Option<&SecretString>) -> Result<Arc<dyn Store>> {
    let Some(dsn) = dsn else {
        warn!("No DSN configured; sessions and users are kept in memory");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    Ok(Arc::new(PgStore::new(pool)))
}

fn password_checker(enabled: bool) -> Result<Arc<dyn PasswordChecker>> {
    if enabled {
        Ok(Arc::new(HibpChecker::new()?))
    } else {
        warn!("Password breach check disabled");
        Ok(Arc::new(NoBreachCheck))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if storage is unreachable, the configuration is invalid, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        environment = %args.config.environment(),
        storage = if args.dsn.is_some() { "postgres" } else { "memory" },
        "Starting todo-auth"
    );

    let store = connect_store(args.dsn.as_ref()).await?;
    let checker = password_checker(args.breach_check)?;
    let email = EmailDispatcher::new(Arc::new(LogEmailSender))
        .with_from(args.email_from)
        .with_timeout_seconds(args.email_timeout_seconds);

    let auth_state = AuthState::new(args.config, store, checker, email)
        .context("Invalid auth configuration")?;

    let result = api::new(args.port, Arc::new(auth_state)).await;
    telemetry::shutdown_tracer();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_dsn_uses_memory_store() -> Result<()> {
        let store = connect_store(None).await?;
        store.ping().await?;
        Ok(())
    }

    #[test]
    fn breach_check_toggle() -> Result<()> {
        password_checker(true)?;
        password_checker(false)?;
        Ok(())
    }
}
