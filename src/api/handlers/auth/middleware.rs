//! Session-protected routes.
//!
//! `protected_route` resolves the session cookie before the handler runs:
//!
//! - no cookie: `302` to `/login`
//! - valid session, unverified email: `302` to `/verify-email`
//! - valid session: the user is attached to the request and the cookie is
//!   refreshed when the session was renewed
//! - expired or unknown session: the handler runs anonymously and the cookie
//!   is cleared
//!
//! Handlers read the user with [`current_user`] or the [`CurrentUser`]
//! extractor. An anonymous request yields `None`; handlers that need a user
//! must reject it themselves.

use axum::{
    async_trait,
    extract::{Extension, FromRequestParts, Request},
    http::{
        header::{LOCATION, SET_COOKIE},
        request::Parts,
        Extensions, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, error};

use super::{
    session::{clear_session_cookie, set_session_cookie, token_from_cookie, SessionError, SessionUser},
    state::AuthState,
};

pub const LOGIN_PATH: &str = "/login";
pub const VERIFY_EMAIL_PATH: &str = "/verify-email";

#[derive(Clone, Debug)]
struct SessionContext(SessionUser);

/// The session user attached by [`protected_route`], if any.
#[must_use]
pub fn current_user(extensions: &Extensions) -> Option<&SessionUser> {
    extensions
        .get::<SessionContext>()
        .map(|SessionContext(user)| user)
}

/// Extractor form of [`current_user`].
#[derive(Clone, Debug)]
pub struct CurrentUser(pub Option<SessionUser>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(current_user(&parts.extensions).cloned()))
    }
}

pub(super) fn redirect(location: &'static str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

pub async fn protected_route(
    Extension(auth_state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = token_from_cookie(request.headers()) else {
        return redirect(LOGIN_PATH);
    };

    match auth_state.sessions().validate_session(&token).await {
        Ok(validated) => {
            let mut response = if validated.user.email_verified {
                request
                    .extensions_mut()
                    .insert(SessionContext(validated.user));
                next.run(request).await
            } else {
                debug!(user_id = %validated.user.id, "Email not verified");
                redirect(VERIFY_EMAIL_PATH)
            };
            if validated.renewed {
                set_session_cookie(
                    response.headers_mut(),
                    &token,
                    validated.session.expires_at,
                );
            }
            response
        }
        Err(SessionError::Invalid | SessionError::Expired) => {
            debug!("Continuing without a session");
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .append(SET_COOKIE, clear_session_cookie());
            response
        }
        Err(SessionError::Storage(err)) => {
            error!("Failed to validate session: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
