//! Registration, password login, and email verification use cases.

use anyhow::{anyhow, Context};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::{
    password::{hash_password, verify_password, PasswordChecker, MAX_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH},
    session::{SessionError, SessionManager, ValidatedSession},
    state::Environment,
    storage::{CreateUserOutcome, EmailVerificationRequest, Store, UserRecord},
    token::{hash_token, random_bytes},
    utils::{normalize_email, now_unix_seconds, valid_email},
};
use crate::api::email::{EmailDispatcher, EmailMessage};

const TEST_VERIFICATION_CODE: &str = "TEST";
const VERIFICATION_CODE_BYTES: usize = 5;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const DUMMY_PASSWORD: &str = "unknown account placeholder";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Policy or breach check failed; callers must not reveal which.
    #[error("password does not meet requirements")]
    WeakPassword,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("invalid email or password")]
    InvalidCredentials,
    /// Duplicate email; rendered like any other failure so accounts cannot be probed.
    #[error("email unavailable")]
    EmailUnavailable,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("email verification request not found")]
    VerificationNotFound,
    #[error("email verification request expired")]
    VerificationExpired,
    #[error("invalid email verification code")]
    InvalidVerificationCode,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password does not meet requirements",
            ),
            Self::PasswordMismatch => (StatusCode::BAD_REQUEST, "Passwords do not match"),
            Self::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid email or password"),
            Self::EmailUnavailable => {
                debug!("Registration rejected for an existing email");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            Self::Session(SessionError::Invalid | SessionError::Expired) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized")
            }
            Self::VerificationNotFound => (
                StatusCode::BAD_REQUEST,
                "Email verification request not found",
            ),
            Self::VerificationExpired => {
                (StatusCode::BAD_REQUEST, "Email verification request expired")
            }
            Self::InvalidVerificationCode => {
                (StatusCode::BAD_REQUEST, "Invalid email verification code")
            }
            Self::Session(SessionError::Storage(err)) | Self::Internal(err) => {
                error!("Auth request failed: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        (status, message).into_response()
    }
}

/// A freshly created user plus the in-flight verification email.
#[derive(Debug)]
pub struct RegisteredUser {
    pub user: UserRecord,
    pub email_task: JoinHandle<anyhow::Result<()>>,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    checker: Arc<dyn PasswordChecker>,
    email: EmailDispatcher,
    environment: Environment,
    verification_ttl_seconds: i64,
    /// Verified against on unknown emails so both login paths pay for Argon2.
    dummy_hash: OnceCell<String>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        checker: Arc<dyn PasswordChecker>,
        email: EmailDispatcher,
        environment: Environment,
        verification_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            sessions,
            checker,
            email,
            environment,
            verification_ttl_seconds,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Create an unverified user and send the verification code.
    ///
    /// # Errors
    /// `WeakPassword` for a bad email or password, `EmailUnavailable` for a
    /// duplicate, `Internal` for infrastructure failures.
    pub async fn register_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<RegisteredUser, AuthError> {
        if password.is_empty() || password.len() > MAX_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }
        let email = normalize_email(email);
        if email.is_empty() || !valid_email(&email) {
            debug!("Rejected registration with malformed email");
            return Err(AuthError::WeakPassword);
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }

        let compromised = self.checker.is_compromised(password).await.map_err(|err| {
            error!("Password breach check failed: {err:#}");
            AuthError::Internal(err)
        })?;
        if compromised {
            debug!("Rejected registration with breached password");
            return Err(AuthError::WeakPassword);
        }

        let owned = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&owned))
            .await
            .context("password hashing task failed")??;

        let user = match self.store.create_user(&email, &password_hash).await {
            Ok(CreateUserOutcome::Created(user)) => user,
            Ok(CreateUserOutcome::Conflict) => return Err(AuthError::EmailUnavailable),
            Err(err) => {
                error!("Failed to create user: {err:#}");
                return Err(AuthError::Internal(err));
            }
        };

        let code = self.verification_code()?;
        let now = now_unix_seconds();
        let expires_at = now
            .checked_add(self.verification_ttl_seconds)
            .ok_or_else(|| anyhow!("verification expiry overflows"))?;
        self.store
            .insert_email_verification_request(&EmailVerificationRequest {
                user_id: user.id,
                code: code.clone(),
                created_at: now,
                expires_at,
            })
            .await
            .map_err(|err| {
                error!(user_id = %user.id, "Failed to store email verification request: {err:#}");
                AuthError::Internal(err)
            })?;

        let email_task = self
            .email
            .dispatch(EmailMessage::verification(
                user.id,
                &user.email,
                &code,
                self.verification_ttl_seconds,
            ));
        info!(user_id = %user.id, "User registered");

        Ok(RegisteredUser { user, email_task })
    }

    /// Check credentials and open a session.
    ///
    /// Returns the validated session and the raw token for the cookie.
    ///
    /// # Errors
    /// `InvalidCredentials` for unknown users or wrong passwords.
    pub async fn authenticate_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(ValidatedSession, String), AuthError> {
        let email = normalize_email(email);
        let user = self.store.get_user_by_email(&email).await.map_err(|err| {
            error!("Failed to lookup user: {err:#}");
            AuthError::Internal(err)
        })?;

        let phc = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.dummy_hash().await?,
        };
        let owned = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&owned, &phc))
            .await
            .context("password verification task failed")??;

        let Some(user) = user else {
            debug!("Password authentication for unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if !matches {
            warn!(user_id = %user.id, "Password authentication failed");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.sessions.create_session(user.id).await?;
        let session = self.sessions.validate_session(&token).await?;
        info!(user_id = %user.id, "User authenticated");
        Ok((session, token))
    }

    /// Mark the session's user verified when `code` matches the pending request.
    ///
    /// # Errors
    /// `Session` for a bad session, `VerificationNotFound`,
    /// `VerificationExpired` (the stale request is deleted),
    /// `InvalidVerificationCode`, or `Internal`.
    pub async fn verify_email(&self, token: &str, code: &str) -> Result<(), AuthError> {
        let session = self.sessions.validate_session(token).await?;
        let user_id = session.user.id;

        let request = self
            .store
            .get_email_verification_request(user_id)
            .await?
            .ok_or(AuthError::VerificationNotFound)?;

        if now_unix_seconds() >= request.expires_at {
            self.store.delete_email_verification_request(user_id).await?;
            return Err(AuthError::VerificationExpired);
        }

        if !self
            .store
            .validate_email_verification_request(user_id, code.trim())
            .await?
        {
            return Err(AuthError::InvalidVerificationCode);
        }

        self.store.set_user_email_verified(user_id).await?;
        self.store.delete_email_verification_request(user_id).await?;
        info!(user_id = %user_id, "Email verified");
        Ok(())
    }

    /// Invalidate the session named by a raw token.
    ///
    /// # Errors
    /// `Session(Invalid)` when no session matched.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.invalidate_session(&hash_token(token)).await?;
        Ok(())
    }

    async fn dummy_hash(&self) -> Result<String, AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(|| hash_password(DUMMY_PASSWORD))
                    .await
                    .context("password hashing task failed")?
            })
            .await?;
        Ok(hash.clone())
    }

    fn verification_code(&self) -> Result<String, AuthError> {
        if self.environment == Environment::Test {
            return Ok(TEST_VERIFICATION_CODE.to_string());
        }
        let bytes = random_bytes::<VERIFICATION_CODE_BYTES>()
            .map_err(|err| AuthError::Internal(anyhow!("verification code: {err:#}")))?;
        Ok(base32_encode(&bytes))
    }
}

/// RFC 4648 base32 without padding.
fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0u8;
    for &byte in bytes {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(char::from(BASE32_ALPHABET[usize::from((buffer >> bits) & 0x1f)]));
        }
    }
    if bits > 0 {
        out.push(char::from(
            BASE32_ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)],
        ));
    }
    out
}
