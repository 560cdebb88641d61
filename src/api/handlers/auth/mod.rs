//! Auth handlers and supporting modules.
//!
//! This module coordinates password authentication, cookie sessions, CSRF
//! protection, per-route rate limiting, and email verification.
//!
//! ## Request pipeline
//!
//! State-changing auth routes run their layers in a fixed order:
//!
//! 1. **Rate limiter** keyed by peer IP (`429` with `X-RateLimit-*` headers).
//! 2. **CSRF guard**: `Origin`/`Referer` allow-list, then a single-use token
//!    from the `csrf_token` form field, `X-CSRF-Token` header, or
//!    `csrf_token` cookie (`403`).
//! 3. **Handler**, which calls into `AuthService`.
//!
//! Protected pages use `protected_route`, which resolves the session cookie and
//! attaches the user for `current_user`/`CurrentUser`.
//!
//! ## Sessions
//!
//! Clients hold a 256-bit random token in the `session` cookie
//! (`HttpOnly; Secure; SameSite=Strict`). Only its SHA-256 digest is stored.
//! Sessions last 24 hours; validation inside the renewal threshold (15 days by
//! default, so every validation) pushes expiry out by another 24 hours.
//!
//! ## Email verification
//!
//! Registration stores an 8-character base32 code (fixed `TEST` in the test
//! environment) valid for 10 minutes and emails it on a detached task. Users
//! with an unverified email are redirected to `/verify-email` by
//! `protected_route`.

mod csrf;
pub(crate) mod login;
pub(crate) mod logout;
pub(crate) mod me;
mod memory;
mod middleware;
pub(crate) mod pages;
mod password;
mod rate_limit;
pub(crate) mod register;
mod service;
mod session;
mod state;
mod storage;
mod token;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use csrf::{csrf_protect, CsrfError, CsrfGuard, CSRF_COOKIE_NAME, CSRF_FIELD, CSRF_HEADER};
pub use memory::MemoryStore;
pub use middleware::{current_user, protected_route, CurrentUser};
pub use password::{
    hash_password, verify_password, HibpChecker, NoBreachCheck, PasswordChecker,
    MAX_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH,
};
pub use rate_limit::{
    limit_login, limit_register, limit_verify_email, NoopRateLimiter, RateLimitDecision,
    RateLimiter, RateLimiters, SlidingWindowLimiter,
};
pub use service::{AuthError, AuthService, RegisteredUser};
pub use session::{
    clear_session_cookie, session_cookie, token_from_cookie, SessionError, SessionManager,
    SessionUser, ValidatedSession, SESSION_COOKIE_NAME,
};
pub use state::{AuthConfig, AuthState, Environment};
pub use storage::{
    CreateUserOutcome, EmailVerificationRequest, PgStore, SessionRecord, SessionUserRecord,
    Store, UserRecord,
};
pub use token::{generate_token, hash_token};
