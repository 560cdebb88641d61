//! In-process `Store` used for development runs without a database and by tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::storage::{
    CreateUserOutcome, EmailVerificationRequest, SessionRecord, SessionUserRecord, Store,
    UserRecord,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    sessions: HashMap<String, SessionRecord>,
    verifications: HashMap<Uuid, EmailVerificationRequest>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live session rows.
    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, session: &SessionRecord) -> Result<SessionRecord> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&session.user_id) {
            return Err(anyhow!("unknown user {}", session.user_id));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn validate_session_token(&self, id: &str) -> Result<Option<SessionUserRecord>> {
        let tables = self.tables.lock().await;
        let Some(session) = tables.sessions.get(id) else {
            return Ok(None);
        };
        Ok(tables
            .users
            .get(&session.user_id)
            .map(|user| SessionUserRecord {
                id: session.id.clone(),
                user_id: session.user_id,
                expires_at: session.expires_at,
                email: user.email.clone(),
                email_verified: user.email_verified,
            }))
    }

    async fn update_session(&self, id: &str, expires_at: i64) -> Result<Option<SessionRecord>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.sessions.get_mut(id).map(|session| {
            session.expires_at = expires_at;
            session.clone()
        }))
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.tables.lock().await.sessions.remove(id).is_some())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, email: &str, password_hash: &str) -> Result<CreateUserOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email == email) {
            return Ok(CreateUserOutcome::Conflict);
        }
        let user = UserRecord {
            id: Uuid::now_v7(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            email_verified: false,
        };
        tables.users.insert(user.id, user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn insert_email_verification_request(
        &self,
        request: &EmailVerificationRequest,
    ) -> Result<EmailVerificationRequest> {
        let mut tables = self.tables.lock().await;
        tables
            .verifications
            .insert(request.user_id, request.clone());
        Ok(request.clone())
    }

    async fn get_email_verification_request(
        &self,
        user_id: Uuid,
    ) -> Result<Option<EmailVerificationRequest>> {
        Ok(self
            .tables
            .lock()
            .await
            .verifications
            .get(&user_id)
            .cloned())
    }

    async fn delete_email_verification_request(&self, user_id: Uuid) -> Result<()> {
        self.tables.lock().await.verifications.remove(&user_id);
        Ok(())
    }

    async fn validate_email_verification_request(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .verifications
            .get(&user_id)
            .is_some_and(|request| bool::from(request.code.as_bytes().ct_eq(code.as_bytes()))))
    }

    async fn set_user_email_verified(&self, user_id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("unknown user {user_id}"))?;
        user.email_verified = true;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
