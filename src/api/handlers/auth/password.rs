//! Password policy, breach lookup, and Argon2id hashing.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

pub const MIN_PASSWORD_LENGTH: usize = 12;
pub const MAX_PASSWORD_LENGTH: usize = 127;

const HIBP_RANGE_URL: &str = "https://api.pwnedpasswords.com/range/";
const HIBP_TIMEOUT: Duration = Duration::from_secs(5);
const HIBP_PREFIX_LEN: usize = 5;

/// Known-compromised password lookup.
#[async_trait]
pub trait PasswordChecker: Send + Sync {
    /// # Errors
    /// Returns an error when the lookup itself fails.
    async fn is_compromised(&self, password: &str) -> Result<bool>;
}

/// Accepts every password.
#[derive(Clone, Debug, Default)]
pub struct NoBreachCheck;

#[async_trait]
impl PasswordChecker for NoBreachCheck {
    async fn is_compromised(&self, _password: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Have I Been Pwned range API (k-anonymity): only the first five hex chars of
/// the SHA-1 digest leave the process.
#[derive(Clone, Debug)]
pub struct HibpChecker {
    client: Client,
    base_url: String,
}

impl HibpChecker {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_base_url(HIBP_RANGE_URL)
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(HIBP_TIMEOUT)
            .build()
            .context("failed to build breach check client")?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl PasswordChecker for HibpChecker {
    #[instrument(skip_all)]
    async fn is_compromised(&self, password: &str) -> Result<bool> {
        let digest = sha1_hex(password);
        let prefix = digest.get(..HIBP_PREFIX_LEN).unwrap_or(&digest);
        let url = format!("{}{prefix}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("breach check request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "breach check returned status {}",
                response.status()
            ));
        }
        let body = response
            .text()
            .await
            .context("failed to read breach check response")?;

        let compromised = range_contains(&body, &digest);
        debug!(compromised, "breach check completed");
        Ok(compromised)
    }
}

/// Uppercase, as served by the range API.
fn sha1_hex(password: &str) -> String {
    hex::encode_upper(Sha1::digest(password.as_bytes()))
}

/// Whether a range response (`SUFFIX:COUNT` per line) contains `digest_hex`.
pub(super) fn range_contains(body: &str, digest_hex: &str) -> bool {
    let Some((prefix, _)) = digest_hex.split_at_checked(HIBP_PREFIX_LEN) else {
        return false;
    };
    let target = digest_hex.as_bytes();
    body.lines()
        .filter_map(|line| line.split(':').next())
        .map(|suffix| format!("{prefix}{}", suffix.trim().to_ascii_uppercase()))
        .fold(false, |found, candidate| {
            found | bool::from(candidate.as_bytes().ct_eq(target))
        })
}

/// Hash with Argon2id default parameters into a PHC string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// `Ok(false)` for a wrong password; `Err` only for an unparseable hash.
///
/// # Errors
/// Returns an error if `phc` is not a valid PHC string.
pub fn verify_password(password: &str, phc: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_hex_matches_known_vector() {
        assert_eq!(
            sha1_hex("password"),
            "5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8"
        );
    }

    #[test]
    fn range_contains_matches_suffix_case_insensitively() {
        let digest = sha1_hex("password");
        let body = "0018A45C4D1DEF81644B54AB7F969B88D65:1\r\n\
                    1e4c9b93f3f0682250b6cf8331b7ee68fd8:9659365\r\n\
                    1F2B668E8AABEF1C59E9EC6F82E3F3CD786:1";
        assert!(range_contains(body, &digest));
    }

    #[test]
    fn range_contains_rejects_absent_suffix() {
        let digest = sha1_hex("password");
        let body = "0018A45C4D1DEF81644B54AB7F969B88D65:1\n1F2B668E8AABEF1C59E9EC6F82E3F3CD786:3";
        assert!(!range_contains(body, &digest));
        assert!(!range_contains("", &digest));
        assert!(!range_contains(body, "abc"));
    }

    #[tokio::test]
    async fn no_breach_check_accepts_everything() -> Result<()> {
        assert!(!NoBreachCheck.is_compromised("password").await?);
        Ok(())
    }

    #[test]
    fn hash_then_verify() -> Result<()> {
        let hash = hash_password("correct horse battery staple")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery staple", &hash)?);
        assert!(!verify_password("Tr0ub4dor&3-nope", &hash)?);
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        assert_ne!(hash_password("same password!")?, hash_password("same password!")?);
        Ok(())
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }
}
