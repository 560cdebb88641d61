//! CSRF protection: single-use form tokens plus an `Origin`/`Referer` allow-list.
//!
//! Tokens are 32 random bytes (URL-safe base64, padded) kept in memory with
//! their creation time. A token is accepted while younger than the freshness
//! window. A request claims its token for the duration of the handler; the
//! token is put back only when the response is not a 2xx, so a failed
//! submission (wrong password, weak password) can be retried with the same
//! page token while two concurrent submissions cannot both succeed.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::{to_bytes, Body},
    extract::{Extension, Request},
    http::{
        header::{CONTENT_TYPE, ORIGIN, REFERER},
        HeaderMap, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use super::{
    state::AuthState,
    token::{random_bytes, TOKEN_BYTES},
    utils::cookie_value,
};

pub const CSRF_FIELD: &str = "csrf_token";
pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("Invalid origin")]
    OriginInvalid,
    #[error("CSRF token missing")]
    TokenMissing,
    #[error("Invalid CSRF token")]
    TokenInvalid,
}

impl IntoResponse for CsrfError {
    fn into_response(self) -> Response {
        (StatusCode::FORBIDDEN, self.to_string()).into_response()
    }
}

pub struct CsrfGuard {
    tokens: Mutex<HashMap<String, Instant>>,
    allowed_hosts: Vec<String>,
    token_ttl: Duration,
}

impl CsrfGuard {
    /// Build a guard accepting the hosts of `allowed_origins`.
    ///
    /// An empty list denies every unsafe request.
    ///
    /// # Errors
    /// Returns an error if an origin is not an absolute URL with a host.
    pub fn new<I, S>(allowed_origins: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_hosts = allowed_origins
            .into_iter()
            .map(|origin| {
                let origin = origin.as_ref();
                origin_host(origin)
                    .with_context(|| format!("invalid allowed origin: {origin}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tokens: Mutex::new(HashMap::new()),
            allowed_hosts,
            token_ttl: DEFAULT_TOKEN_TTL,
        })
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Issue and record a fresh token.
    ///
    /// # Errors
    /// Returns an error if the secure random source is unavailable.
    pub async fn generate_token(&self) -> Result<String> {
        let bytes = random_bytes::<TOKEN_BYTES>().context("failed to generate CSRF token")?;
        let token = base64::engine::general_purpose::URL_SAFE.encode(bytes);
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, created_at| created_at.elapsed() < self.token_ttl);
        tokens.insert(token.clone(), Instant::now());
        Ok(token)
    }

    /// Sweep stale tokens, then report whether `token` is known and fresh.
    pub async fn validate_token(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, created_at| created_at.elapsed() < self.token_ttl);
        tokens.contains_key(token)
    }

    /// Remove a token; unknown tokens are ignored.
    pub async fn consume_token(&self, token: &str) {
        self.tokens.lock().await.remove(token);
    }

    /// Remove a fresh token and return its creation time.
    ///
    /// Only one caller can hold a given token at a time.
    pub async fn claim_token(&self, token: &str) -> Option<Instant> {
        let mut tokens = self.tokens.lock().await;
        tokens.retain(|_, created_at| created_at.elapsed() < self.token_ttl);
        tokens.remove(token)
    }

    /// Return a claimed token with its original creation time.
    pub async fn release_token(&self, token: String, created_at: Instant) {
        if created_at.elapsed() < self.token_ttl {
            self.tokens.lock().await.insert(token, created_at);
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_hosts.is_empty() {
            return false;
        }
        let Ok(host) = origin_host(origin) else {
            return false;
        };
        self.allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&host))
    }
}

/// `host[:port]` of an absolute URL.
fn origin_host(value: &str) -> Result<String> {
    let url = Url::parse(value.trim())?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("URL has no host: {value}"))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn is_form_body(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE)
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .is_some_and(|content_type| {
            content_type
                .essence_str()
                .eq_ignore_ascii_case(mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
        })
}

fn form_field(body: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Middleware enforcing origin and token checks on unsafe methods.
pub async fn csrf_protect(
    Extension(auth_state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    protect(auth_state.csrf(), request, next).await
}

pub(super) async fn protect(guard: &CsrfGuard, request: Request, next: Next) -> Response {
    if is_safe_method(request.method()) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let source = header_str(headers, ORIGIN).or_else(|| header_str(headers, REFERER));
    if !source.is_some_and(|origin| guard.is_origin_allowed(origin)) {
        warn!(origin = source.unwrap_or(""), "CSRF origin rejected");
        return CsrfError::OriginInvalid.into_response();
    }

    let (parts, body) = request.into_parts();
    let (form_token, body) = if is_form_body(&parts.headers) {
        match to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => (form_field(&bytes, CSRF_FIELD), Body::from(bytes)),
            Err(err) => {
                debug!("Failed to buffer form body: {err}");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Form body too large").into_response();
            }
        }
    } else {
        (None, body)
    };

    let token = form_token
        .or_else(|| header_str(&parts.headers, CSRF_HEADER).map(str::to_string))
        .or_else(|| cookie_value(&parts.headers, CSRF_COOKIE_NAME));

    let Some(token) = token else {
        warn!("CSRF token missing");
        return CsrfError::TokenMissing.into_response();
    };

    let Some(created_at) = guard.claim_token(&token).await else {
        warn!("CSRF token rejected");
        return CsrfError::TokenInvalid.into_response();
    };

    let response = next.run(Request::from_parts(parts, body)).await;
    if !response.status().is_success() {
        guard.release_token(token, created_at).await;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::post, Router};
    use base64::engine::general_purpose::URL_SAFE;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn guard() -> Result<CsrfGuard> {
        CsrfGuard::new(["http://localhost:8080", "https://todo.example.com"])
    }

    #[test]
    fn allowed_hosts_are_normalized() -> Result<()> {
        let guard = guard()?;
        assert_eq!(
            guard.allowed_hosts(),
            ["localhost:8080".to_string(), "todo.example.com".to_string()]
        );
        Ok(())
    }

    #[test]
    fn origin_without_host_is_rejected_at_construction() {
        assert!(CsrfGuard::new(["localhost:8080"]).is_err());
        assert!(CsrfGuard::new(["not a url"]).is_err());
    }

    #[test]
    fn origin_matching_is_case_insensitive_and_port_exact() -> Result<()> {
        let guard = guard()?;
        assert!(guard.is_origin_allowed("http://localhost:8080"));
        assert!(guard.is_origin_allowed("https://TODO.example.com/login"));
        assert!(!guard.is_origin_allowed("http://localhost:9090"));
        assert!(!guard.is_origin_allowed("https://evil.example.com"));
        assert!(!guard.is_origin_allowed("garbage"));
        Ok(())
    }

    #[test]
    fn empty_allow_list_denies_all() -> Result<()> {
        let guard = CsrfGuard::new(Vec::<String>::new())?;
        assert!(!guard.is_origin_allowed("http://localhost:8080"));
        Ok(())
    }

    #[tokio::test]
    async fn token_is_padded_url_safe_base64() -> Result<()> {
        let token = guard()?.generate_token().await?;
        assert!(token.ends_with('='));
        assert_eq!(URL_SAFE.decode(token.as_bytes())?.len(), TOKEN_BYTES);
        Ok(())
    }

    #[tokio::test]
    async fn token_validates_until_consumed() -> Result<()> {
        let guard = guard()?;
        let token = guard.generate_token().await?;
        assert!(guard.validate_token(&token).await);
        assert!(guard.validate_token(&token).await);
        guard.consume_token(&token).await;
        assert!(!guard.validate_token(&token).await);
        guard.consume_token(&token).await;
        assert!(!guard.validate_token("unknown").await);
        Ok(())
    }

    #[tokio::test]
    async fn stale_token_fails_validation() -> Result<()> {
        let guard = guard()?.with_token_ttl(Duration::ZERO);
        let token = guard.generate_token().await?;
        assert!(!guard.validate_token(&token).await);
        assert!(guard.tokens.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn claimed_token_is_unavailable_until_released() -> Result<()> {
        let guard = guard()?;
        let token = guard.generate_token().await?;
        let created_at = guard.claim_token(&token).await;
        assert!(created_at.is_some());
        assert!(guard.claim_token(&token).await.is_none());

        if let Some(created_at) = created_at {
            guard.release_token(token.clone(), created_at).await;
        }
        assert_eq!(guard.claim_token(&token).await, created_at);
        Ok(())
    }

    #[tokio::test]
    async fn issuing_sweeps_stale_tokens() -> Result<()> {
        let guard = guard()?.with_token_ttl(Duration::ZERO);
        guard.generate_token().await?;
        guard.generate_token().await?;
        guard.generate_token().await?;
        assert_eq!(guard.tokens.lock().await.len(), 1);
        Ok(())
    }

    fn app(guard: Arc<CsrfGuard>, status: StatusCode) -> Router {
        Router::new()
            .route("/submit", post(move || async move { status }))
            .layer(middleware::from_fn(move |request: Request, next: Next| {
                let guard = guard.clone();
                async move { protect(&guard, request, next).await }
            }))
    }

    fn form_request(origin: Option<&str>, body: String) -> Result<Request> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        Ok(builder.body(Body::from(body))?)
    }

    async fn body_text(response: Response) -> Result<String> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    #[tokio::test]
    async fn safe_methods_pass_through() -> Result<()> {
        let guard = Arc::new(guard()?);
        let app = Router::new()
            .route("/submit", axum::routing::get(|| async { "ok" }))
            .layer(middleware::from_fn(move |request: Request, next: Next| {
                let guard = guard.clone();
                async move { protect(&guard, request, next).await }
            }));
        let response = app
            .oneshot(Request::builder().uri("/submit").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn disallowed_origin_is_forbidden_even_with_valid_token() -> Result<()> {
        let guard = Arc::new(guard()?);
        let token = guard.generate_token().await?;
        let response = app(guard.clone(), StatusCode::OK)
            .oneshot(form_request(
                Some("https://evil.example.com"),
                format!("csrf_token={token}"),
            )?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await?, "Invalid origin");
        assert!(guard.validate_token(&token).await);
        Ok(())
    }

    #[tokio::test]
    async fn missing_origin_and_referer_is_forbidden() -> Result<()> {
        let guard = Arc::new(guard()?);
        let response = app(guard, StatusCode::OK)
            .oneshot(form_request(None, String::new())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await?, "Invalid origin");
        Ok(())
    }

    #[tokio::test]
    async fn referer_is_used_when_origin_absent() -> Result<()> {
        let guard = Arc::new(guard()?);
        let token = guard.generate_token().await?;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .header(REFERER, "http://localhost:8080/login")
            .header(CSRF_HEADER, token.as_str())
            .body(Body::empty())?;
        let response = app(guard, StatusCode::NO_CONTENT).oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn missing_token_is_forbidden() -> Result<()> {
        let guard = Arc::new(guard()?);
        let response = app(guard, StatusCode::OK)
            .oneshot(form_request(Some("http://localhost:8080"), "email=a".into())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await?, "CSRF token missing");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_token_is_forbidden() -> Result<()> {
        let guard = Arc::new(guard()?);
        let response = app(guard, StatusCode::OK)
            .oneshot(form_request(
                Some("http://localhost:8080"),
                "csrf_token=forged".into(),
            )?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await?, "Invalid CSRF token");
        Ok(())
    }

    #[tokio::test]
    async fn token_consumed_only_after_success() -> Result<()> {
        let guard = Arc::new(guard()?);
        let token = guard.generate_token().await?;
        let body = format!(
            "csrf_token={}",
            url::form_urlencoded::byte_serialize(token.as_bytes()).collect::<String>()
        );

        let failed = app(guard.clone(), StatusCode::BAD_REQUEST)
            .oneshot(form_request(Some("http://localhost:8080"), body.clone())?)
            .await?;
        assert_eq!(failed.status(), StatusCode::BAD_REQUEST);
        assert!(guard.validate_token(&token).await);

        let succeeded = app(guard.clone(), StatusCode::NO_CONTENT)
            .oneshot(form_request(Some("http://localhost:8080"), body.clone())?)
            .await?;
        assert_eq!(succeeded.status(), StatusCode::NO_CONTENT);
        assert!(!guard.validate_token(&token).await);

        let replayed = app(guard, StatusCode::NO_CONTENT)
            .oneshot(form_request(Some("http://localhost:8080"), body)?)
            .await?;
        assert_eq!(replayed.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_submissions_share_one_success() -> Result<()> {
        let guard = Arc::new(guard()?);
        let token = guard.generate_token().await?;
        let slow = Router::new()
            .route(
                "/submit",
                post(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    StatusCode::NO_CONTENT
                }),
            )
            .layer(middleware::from_fn({
                let guard = guard.clone();
                move |request: Request, next: Next| {
                    let guard = guard.clone();
                    async move { protect(&guard, request, next).await }
                }
            }));

        let submit = || {
            Request::builder()
                .method(Method::POST)
                .uri("/submit")
                .header(ORIGIN, "http://localhost:8080")
                .header(CSRF_HEADER, token.as_str())
                .body(Body::empty())
        };
        let (first, second) = tokio::join!(
            slow.clone().oneshot(submit()?),
            slow.clone().oneshot(submit()?)
        );

        let mut statuses = [first?.status(), second?.status()];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::NO_CONTENT, StatusCode::FORBIDDEN]);
        assert!(!guard.validate_token(&token).await);
        Ok(())
    }

    #[tokio::test]
    async fn form_content_type_is_case_insensitive() -> Result<()> {
        let guard = Arc::new(guard()?);
        let token = guard.generate_token().await?;
        let body = format!(
            "csrf_token={}",
            url::form_urlencoded::byte_serialize(token.as_bytes()).collect::<String>()
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .header(ORIGIN, "http://localhost:8080")
            .header(CONTENT_TYPE, "Application/X-WWW-Form-Urlencoded; charset=UTF-8")
            .body(Body::from(body))?;
        let response = app(guard.clone(), StatusCode::NO_CONTENT)
            .oneshot(request)
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!guard.validate_token(&token).await);
        Ok(())
    }

    #[tokio::test]
    async fn cookie_token_is_last_resort() -> Result<()> {
        let guard = Arc::new(guard()?);
        let token = guard.generate_token().await?;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .header(ORIGIN, "http://localhost:8080")
            .header(axum::http::header::COOKIE, format!("{CSRF_COOKIE_NAME}={token}"))
            .body(Body::empty())?;
        let response = app(guard, StatusCode::OK).oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
