//! Session lifecycle and the session cookie.
//!
//! A session row is keyed by the SHA-256 digest of the raw token held in the
//! client's cookie. Validation deletes expired rows and extends the expiry of
//! rows inside the renewal window.

use anyhow::anyhow;
use axum::http::{
    header::{InvalidHeaderValue, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    storage::{SessionRecord, Store},
    token::{generate_token, hash_token},
    utils::{cookie_value, http_date, now_unix_seconds},
};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Token absent, malformed, or unknown.
    #[error("invalid session")]
    Invalid,
    /// Token was known but past expiry; the row has been deleted.
    #[error("session expired")]
    Expired,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// User attached to a valid session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Clone, Debug)]
pub struct ValidatedSession {
    pub session: SessionRecord,
    pub user: SessionUser,
    /// Expiry was extended during validation.
    pub renewed: bool,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    ttl_seconds: i64,
    renewal_threshold_seconds: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ttl_seconds: i64, renewal_threshold_seconds: i64) -> Self {
        Self {
            store,
            ttl_seconds,
            renewal_threshold_seconds,
        }
    }

    /// Persist a new session for `user_id` and return the raw token.
    ///
    /// # Errors
    /// Returns `SessionError::Storage` if the token cannot be generated or stored.
    pub async fn create_session(&self, user_id: Uuid) -> Result<String, SessionError> {
        let token = generate_token()?;
        let record = SessionRecord {
            id: hash_token(&token),
            user_id,
            expires_at: self.expiry_from(now_unix_seconds())?,
        };
        self.store.create_session(&record).await.map_err(|err| {
            error!("Failed to create session: {err:#}");
            SessionError::Storage(err.context("failed to create session"))
        })?;
        Ok(token)
    }

    /// Resolve a raw token to its session and user, renewing if due.
    ///
    /// # Errors
    /// `Invalid` for empty/unknown tokens, `Expired` for stale rows (deleted as a
    /// side effect), `Storage` for persistence failures.
    pub async fn validate_session(&self, token: &str) -> Result<ValidatedSession, SessionError> {
        if token.is_empty() {
            return Err(SessionError::Invalid);
        }

        let session_id = hash_token(token);
        let row = self
            .store
            .validate_session_token(&session_id)
            .await
            .map_err(|err| {
                error!("Failed to lookup session: {err:#}");
                SessionError::Storage(err)
            })?
            .ok_or(SessionError::Invalid)?;

        let now = now_unix_seconds();
        if now >= row.expires_at {
            self.store.delete_session(&session_id).await.map_err(|err| {
                error!("Failed to delete expired session: {err:#}");
                SessionError::Storage(err.context("failed to delete expired session"))
            })?;
            debug!(user_id = %row.user_id, "session expired");
            return Err(SessionError::Expired);
        }

        let mut session = SessionRecord {
            id: row.id,
            user_id: row.user_id,
            expires_at: row.expires_at,
        };

        let renewed = now >= session.expires_at.saturating_sub(self.renewal_threshold_seconds);
        if renewed {
            let updated = self
                .store
                .update_session(&session.id, self.expiry_from(now)?)
                .await
                .map_err(|err| {
                    error!("Failed to renew session: {err:#}");
                    SessionError::Storage(err.context("failed to renew session"))
                })?
                .ok_or_else(|| {
                    debug!(user_id = %row.user_id, "session removed during renewal");
                    SessionError::Invalid
                })?;
            session.expires_at = updated.expires_at;
        }

        Ok(ValidatedSession {
            user: SessionUser {
                id: row.user_id,
                email: row.email,
                email_verified: row.email_verified,
            },
            session,
            renewed,
        })
    }

    fn expiry_from(&self, now: i64) -> Result<i64, SessionError> {
        now.checked_add(self.ttl_seconds)
            .ok_or_else(|| SessionError::Storage(anyhow!("session expiry overflows")))
    }

    /// Delete a session by its digest.
    ///
    /// # Errors
    /// `Invalid` when no session matched, `Storage` for persistence failures.
    pub async fn invalidate_session(&self, session_id: &str) -> Result<(), SessionError> {
        let deleted = self
            .store
            .delete_session(session_id)
            .await
            .map_err(|err| SessionError::Storage(err.context("failed to delete session")))?;
        if deleted {
            Ok(())
        } else {
            Err(SessionError::Invalid)
        }
    }
}

/// Session token from the request cookie, if any.
pub fn token_from_cookie(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE_NAME)
}

/// Build the `Set-Cookie` value carrying the session token.
///
/// # Errors
/// Fails if the token contains bytes not allowed in a header value.
pub fn session_cookie(token: &str, expires_at: i64) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; Secure; SameSite=Strict"
    );
    if let Some(expires) = http_date(expires_at) {
        cookie.push_str("; Expires=");
        cookie.push_str(&expires);
    }
    HeaderValue::from_str(&cookie)
}

/// `Set-Cookie` value that removes the session cookie.
#[must_use]
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("session=; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=0")
}

/// Append a session cookie to `headers`, logging if the token is unusable.
pub(super) fn set_session_cookie(headers: &mut HeaderMap, token: &str, expires_at: i64) {
    match session_cookie(token, expires_at) {
        Ok(cookie) => {
            headers.append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
}
