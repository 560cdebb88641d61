//! Persistence contract for users, sessions, and email verification requests.
//!
//! Not-found is reported as `Ok(None)` (or `Ok(false)` for deletes); every
//! `Err` is an infrastructure failure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use std::fmt;
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

/// Stored session keyed by the token digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: i64,
}

/// Session joined with the owning user, as returned by a token lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUserRecord {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: i64,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub email_verified: bool,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("email_verified", &self.email_verified)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailVerificationRequest {
    pub user_id: Uuid,
    pub code: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(UserRecord),
    /// Email already registered.
    Conflict,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, session: &SessionRecord) -> Result<SessionRecord>;

    async fn validate_session_token(&self, id: &str) -> Result<Option<SessionUserRecord>>;

    /// Returns `None` when the session was deleted concurrently.
    async fn update_session(&self, id: &str, expires_at: i64) -> Result<Option<SessionRecord>>;

    /// Returns `false` when no session matched.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn create_user(&self, email: &str, password_hash: &str) -> Result<CreateUserOutcome>;

    /// Store the pending request for a user, replacing any previous one.
    async fn insert_email_verification_request(
        &self,
        request: &EmailVerificationRequest,
    ) -> Result<EmailVerificationRequest>;

    async fn get_email_verification_request(
        &self,
        user_id: Uuid,
    ) -> Result<Option<EmailVerificationRequest>>;

    async fn delete_email_verification_request(&self, user_id: Uuid) -> Result<()>;

    /// Whether the pending request for `user_id` carries `code`.
    async fn validate_email_verification_request(&self, user_id: Uuid, code: &str)
        -> Result<bool>;

    async fn set_user_email_verified(&self, user_id: Uuid) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Postgres-backed store. Schema lives in `sql/schema.sql`.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn session_from_row(row: &PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
    }
}

fn user_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
    }
}

fn verification_from_row(row: &PgRow) -> EmailVerificationRequest {
    EmailVerificationRequest {
        user_id: row.get("user_id"),
        code: row.get("code"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<SessionRecord> {
        let query = r"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, expires_at
        ";
        let row = sqlx::query(query)
            .bind(&session.id)
            .bind(session.user_id)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(session_from_row(&row))
    }

    async fn validate_session_token(&self, id: &str) -> Result<Option<SessionUserRecord>> {
        let query = r"
            SELECT s.id, s.user_id, s.expires_at, u.email, u.email_verified
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session")?;

        Ok(row.map(|row| SessionUserRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            expires_at: row.get("expires_at"),
            email: row.get("email"),
            email_verified: row.get("email_verified"),
        }))
    }

    async fn update_session(&self, id: &str, expires_at: i64) -> Result<Option<SessionRecord>> {
        let query = r"
            UPDATE sessions SET expires_at = $2
            WHERE id = $1
            RETURNING id, user_id, expires_at
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update session")?;
        Ok(row.map(|row| session_from_row(&row)))
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let query = "DELETE FROM sessions WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT id, email, password_hash, email_verified FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn create_user(&self, email: &str, password_hash: &str) -> Result<CreateUserOutcome> {
        let query = r"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING id, email, password_hash, email_verified
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn insert_email_verification_request(
        &self,
        request: &EmailVerificationRequest,
    ) -> Result<EmailVerificationRequest> {
        let query = r"
            INSERT INTO email_verification_requests (user_id, code, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET code = EXCLUDED.code,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            RETURNING user_id, code, created_at, expires_at
        ";
        let row = sqlx::query(query)
            .bind(request.user_id)
            .bind(&request.code)
            .bind(request.created_at)
            .bind(request.expires_at)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert email verification request")?;
        Ok(verification_from_row(&row))
    }

    async fn get_email_verification_request(
        &self,
        user_id: Uuid,
    ) -> Result<Option<EmailVerificationRequest>> {
        let query = r"
            SELECT user_id, code, created_at, expires_at
            FROM email_verification_requests
            WHERE user_id = $1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup email verification request")?;
        Ok(row.map(|row| verification_from_row(&row)))
    }

    async fn delete_email_verification_request(&self, user_id: Uuid) -> Result<()> {
        let query = "DELETE FROM email_verification_requests WHERE user_id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete email verification request")?;
        Ok(())
    }

    async fn validate_email_verification_request(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM email_verification_requests
                WHERE user_id = $1 AND code = $2
            ) AS valid
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(code)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to validate email verification request")?;
        Ok(row.get("valid"))
    }

    async fn set_user_email_verified(&self, user_id: Uuid) -> Result<()> {
        let query = "UPDATE users SET email_verified = TRUE WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}
