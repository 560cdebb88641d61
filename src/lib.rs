//! # todo-auth
//!
//! Session-based authentication for the todo application: registration with
//! email verification, password login, cookie sessions, CSRF protection, and
//! per-route rate limiting.
//!
//! ## Sessions
//!
//! A session is identified by a 256-bit random token carried in the `session`
//! cookie. Storage only ever sees `hex(sha256(token))`, so a leaked table does
//! not yield usable cookies. Sessions slide forward while they are used.
//!
//! ## Passwords
//!
//! Passwords are 12 to 127 bytes, hashed with Argon2id, and checked against the
//! Have I Been Pwned range API using SHA-1 k-anonymity (only a five character
//! prefix leaves the process).
//!
//! ## Forms
//!
//! Every state-changing route requires an allowed `Origin` (or `Referer`) and a
//! single-use CSRF token issued by the matching `GET` page. Responses use
//! `HX-Redirect` so HTMX clients navigate after a `204`.
//!
//! ## Storage
//!
//! `PgStore` backs production deployments (see `sql/schema.sql`); without a
//! DSN the service falls back to an in-memory store.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_hash_is_hex_or_unknown() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn app_user_agent_names_crate_and_version() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
