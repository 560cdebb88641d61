//! Verification email delivery.
//!
//! Registration hands a message to `EmailDispatcher::dispatch`, which runs the
//! `EmailSender` on a detached task bounded by a timeout. The HTTP response
//! never waits on delivery; the returned `JoinHandle` lets callers (and tests)
//! observe the outcome. Failures are logged by the task itself.
//!
//! The default sender is `LogEmailSender`, which logs and returns `Ok(())`.
//! An SMTP or API-backed sender only has to implement `EmailSender`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};
use uuid::Uuid;

const DEFAULT_FROM: &str = "no-reply@todo.local";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    /// Recipient account, recorded in delivery logs.
    pub user_id: Option<Uuid>,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// Message carrying an email verification code valid for `ttl_seconds`.
    #[must_use]
    pub fn verification(user_id: Uuid, to_email: &str, code: &str, ttl_seconds: i64) -> Self {
        Self {
            user_id: Some(user_id),
            to_email: to_email.to_string(),
            subject: "Verify your email".to_string(),
            body: format!(
                "Your verification code is {code}. It expires in {}.",
                expires_in(ttl_seconds)
            ),
        }
    }
}

fn expires_in(seconds: i64) -> String {
    match seconds {
        60 => "1 minute".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}

/// Email delivery abstraction used by the dispatcher.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error.
    async fn send(&self, from: &str, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, from: &str, message: &EmailMessage) -> Result<()> {
        info!(
            from = %from,
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct EmailDispatcher {
    sender: Arc<dyn EmailSender>,
    from: String,
    timeout: Duration,
}

impl EmailDispatcher {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self {
            sender,
            from: DEFAULT_FROM.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_from(mut self, from: String) -> Self {
        self.from = from;
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn from_address(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `message` on a detached task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, message: EmailMessage) -> JoinHandle<Result<()>> {
        let sender = self.sender.clone();
        let from = self.from.clone();
        let timeout = self.timeout;
        let span = tracing::info_span!(
            "email.dispatch",
            to_email = %message.to_email,
            user_id = tracing::field::Empty
        );
        if let Some(user_id) = message.user_id {
            span.record("user_id", tracing::field::display(user_id));
        }

        tokio::spawn(
            async move {
                let result = match tokio::time::timeout(timeout, sender.send(&from, &message)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!(
                        "email delivery timed out after {}s",
                        timeout.as_secs()
                    )),
                };
                if let Err(err) = &result {
                    match message.user_id {
                        Some(user_id) => error!(user_id = %user_id, "Failed to send email: {err:#}"),
                        None => error!("Failed to send email: {err:#}"),
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}
