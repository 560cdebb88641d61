//! API handlers for the auth service.
//!
//! `auth` owns sessions, CSRF, rate limiting, and the account flows; `health`
//! reports storage reachability.

pub mod auth;
pub mod health;
