//! Rate limiting primitives for auth flows.
//!
//! Limiter state is process-local: each limiter keeps the admission instants of
//! every key inside the current window. Keys are peer IPs (see `client_key`).

use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use tracing::warn;

use super::{
    state::{AuthConfig, AuthState},
    utils::client_key,
};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32 },
    /// Limiter disabled; no headers are emitted.
    Unlimited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str) -> RateLimitDecision {
        RateLimitDecision::Unlimited
    }
}

/// Admits at most `limit` requests per key within any `window`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    visitors: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            visitors: Mutex::new(HashMap::new()),
        }
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let decision = {
            let mut visitors = self
                .visitors
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let hits = visitors.entry(key.to_string()).or_default();
            hits.retain(|hit| now.saturating_duration_since(*hit) < self.window);

            let count = u32::try_from(hits.len()).unwrap_or(u32::MAX);
            if count >= self.limit {
                RateLimitDecision::Limited { limit: self.limit }
            } else {
                hits.push(now);
                RateLimitDecision::Allowed {
                    limit: self.limit,
                    remaining: self.limit - count - 1,
                }
            }
        };
        self.sweep(now);
        decision
    }

    /// Drop keys with no hits inside the window; skipped when contended.
    fn sweep(&self, now: Instant) {
        if let Ok(mut visitors) = self.visitors.try_lock() {
            visitors.retain(|_, hits| {
                hits.retain(|hit| now.saturating_duration_since(*hit) < self.window);
                !hits.is_empty()
            });
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.visitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }
}

/// One limiter per rate-limited route group.
#[derive(Clone)]
pub struct RateLimiters {
    pub login: Arc<dyn RateLimiter>,
    pub register: Arc<dyn RateLimiter>,
    pub verify_email: Arc<dyn RateLimiter>,
}

impl RateLimiters {
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let window = Duration::from_secs(config.rate_limit_window_seconds());
        Self {
            login: Arc::new(SlidingWindowLimiter::new(config.login_rate_limit(), window)),
            register: Arc::new(SlidingWindowLimiter::new(
                config.register_rate_limit(),
                window,
            )),
            verify_email: Arc::new(SlidingWindowLimiter::new(
                config.verify_email_rate_limit(),
                window,
            )),
        }
    }

    #[must_use]
    pub fn noop() -> Self {
        Self {
            login: Arc::new(NoopRateLimiter),
            register: Arc::new(NoopRateLimiter),
            verify_email: Arc::new(NoopRateLimiter),
        }
    }
}

fn insert_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
        HeaderValue::from(limit),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
        HeaderValue::from(remaining),
    );
}

pub(super) async fn enforce(
    limiter: &dyn RateLimiter,
    route: &'static str,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    match limiter.check(&key) {
        RateLimitDecision::Limited { limit } => {
            warn!(client = %key, route, "Rate limit exceeded");
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
            insert_limit_headers(response.headers_mut(), limit, 0);
            response
        }
        RateLimitDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            insert_limit_headers(response.headers_mut(), limit, remaining);
            response
        }
        RateLimitDecision::Unlimited => next.run(request).await,
    }
}

pub async fn limit_login(
    Extension(auth_state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(auth_state.limiters().login.as_ref(), "login", request, next).await
}

pub async fn limit_register(
    Extension(auth_state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(
        auth_state.limiters().register.as_ref(),
        "register",
        request,
        next,
    )
    .await
}

pub async fn limit_verify_email(
    Extension(auth_state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(
        auth_state.limiters().verify_email.as_ref(),
        "verify_email",
        request,
        next,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body, extract::ConnectInfo, middleware, routing::post, Router,
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn noop_rate_limiter_is_unlimited() {
        assert_eq!(NoopRateLimiter.check("any"), RateLimitDecision::Unlimited);
    }

    #[test]
    fn third_request_in_window_is_limited() {
        let limiter = SlidingWindowLimiter::new(2, MINUTE);
        let start = Instant::now();

        assert_eq!(
            limiter.check_at("198.51.100.1", start),
            RateLimitDecision::Allowed {
                limit: 2,
                remaining: 1
            }
        );
        assert_eq!(
            limiter.check_at("198.51.100.1", start + Duration::from_secs(1)),
            RateLimitDecision::Allowed {
                limit: 2,
                remaining: 0
            }
        );
        assert_eq!(
            limiter.check_at("198.51.100.1", start + Duration::from_secs(2)),
            RateLimitDecision::Limited { limit: 2 }
        );
    }

    #[test]
    fn requests_admitted_again_after_window() {
        let limiter = SlidingWindowLimiter::new(2, MINUTE);
        let start = Instant::now();
        limiter.check_at("k", start);
        limiter.check_at("k", start);
        assert_eq!(
            limiter.check_at("k", start + Duration::from_secs(30)),
            RateLimitDecision::Limited { limit: 2 }
        );
        assert_eq!(
            limiter.check_at("k", start + MINUTE),
            RateLimitDecision::Allowed {
                limit: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, MINUTE);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_at("a", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at("b", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert_eq!(limiter.check_at("a", now), RateLimitDecision::Limited { limit: 1 });
    }

    #[test]
    fn sweep_forgets_idle_keys() {
        let limiter = SlidingWindowLimiter::new(3, MINUTE);
        let start = Instant::now();
        limiter.check_at("idle", start);
        assert_eq!(limiter.tracked_keys(), 1);
        limiter.check_at("busy", start + 2 * MINUTE);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    fn limited_app(limiter: Arc<dyn RateLimiter>) -> Router {
        Router::new()
            .route("/limited", post(|| async { StatusCode::NO_CONTENT }))
            .layer(middleware::from_fn(move |request: Request, next: Next| {
                let limiter = limiter.clone();
                async move { enforce(limiter.as_ref(), "test", request, next).await }
            }))
    }

    fn request() -> Result<Request, axum::http::Error> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/limited")
            .body(Body::empty())?;
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 9], 40000))));
        Ok(request)
    }

    #[tokio::test]
    async fn middleware_sets_headers_and_rejects_with_429() -> anyhow::Result<()> {
        let app = limited_app(Arc::new(SlidingWindowLimiter::new(2, MINUTE)));

        let first = app.clone().oneshot(request()?).await?;
        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        assert_eq!(first.headers()[RATE_LIMIT_LIMIT_HEADER], "2");
        assert_eq!(first.headers()[RATE_LIMIT_REMAINING_HEADER], "1");

        let second = app.clone().oneshot(request()?).await?;
        assert_eq!(second.headers()[RATE_LIMIT_REMAINING_HEADER], "0");

        let third = app.oneshot(request()?).await?;
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third.headers()[RATE_LIMIT_LIMIT_HEADER], "2");
        assert_eq!(third.headers()[RATE_LIMIT_REMAINING_HEADER], "0");
        Ok(())
    }

    #[tokio::test]
    async fn noop_middleware_emits_no_headers() -> anyhow::Result<()> {
        let response = limited_app(Arc::new(NoopRateLimiter))
            .oneshot(request()?)
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(RATE_LIMIT_LIMIT_HEADER).is_none());
        Ok(())
    }
}
