//! Small helpers shared by the auth handlers and middleware.

use axum::{
    extract::ConnectInfo,
    http::{header::COOKIE, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::DateTime;
use regex::Regex;
use std::net::SocketAddr;
use std::time::SystemTime;

/// Rate-limit key used when the peer address is unknown.
pub(super) const UNKNOWN_CLIENT: &str = "unknown";

/// Client-side redirect header understood by htmx.
pub(super) const HX_REDIRECT: &str = "hx-redirect";

/// `204` instructing htmx to navigate to `location`.
pub(super) fn hx_redirect(location: &'static str) -> Response {
    (StatusCode::NO_CONTENT, [(HX_REDIRECT, location)]).into_response()
}

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Loose email shape check: something, `@`, something, `.`, something.
pub(super) fn valid_email(email: &str) -> bool {
    Regex::new(r"^.+@.+\..+$").is_ok_and(|regex| regex.is_match(email))
}

/// Unix seconds for session and verification expiry.
pub(super) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Format Unix seconds as an RFC 7231 HTTP date for cookie `Expires`.
pub(super) fn http_date(unix_seconds: i64) -> Option<String> {
    DateTime::from_timestamp(unix_seconds, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// First non-empty value of the named cookie.
pub(super) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            let val = parts.next()?.trim();
            (key == name && !val.is_empty()).then(|| val.to_string())
        })
        .next()
}

/// Peer IP from the connection; forwarded headers are not trusted.
pub(super) fn client_key<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(
            || UNKNOWN_CLIENT.to_string(),
            |ConnectInfo(addr)| addr.ip().to_string(),
        )
}
