use super::handlers::{
    auth::{self, csrf_protect, limit_login, limit_register, limit_verify_email, protected_route},
    health,
};
use axum::middleware::from_fn;
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Each group is layered innermost first, so the rate limiter sees a request
/// before the CSRF guard does. Middleware reads `Arc<AuthState>` from request
/// extensions, which keeps this router stateless for the `openapi` binary.
/// Routes added outside (like `/` or `OPTIONS /health`) are not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let pages = OpenApiRouter::new()
        .routes(routes!(auth::pages::login_page))
        .routes(routes!(auth::pages::register_page))
        .routes(routes!(auth::logout::logout));

    let verify_email_page =
        OpenApiRouter::new()
            .routes(routes!(auth::pages::verify_email_page))
            .layer(from_fn(limit_verify_email));

    let register = OpenApiRouter::new()
        .routes(routes!(auth::register::register))
        .layer(from_fn(csrf_protect))
        .layer(from_fn(limit_register));

    let login = OpenApiRouter::new()
        .routes(routes!(auth::login::login))
        .layer(from_fn(csrf_protect))
        .layer(from_fn(limit_login));

    let verify_email = OpenApiRouter::new()
        .routes(routes!(auth::verification::verify_email))
        .layer(from_fn(csrf_protect))
        .layer(from_fn(limit_verify_email));

    let protected = OpenApiRouter::new()
        .routes(routes!(auth::me::me))
        .layer(from_fn(protected_route));

    let router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .merge(pages)
        .merge(verify_email_page)
        .merge(register)
        .merge(login)
        .merge(verify_email)
        .merge(protected);

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Registration, login, sessions, and email verification".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service health".to_string());

    let (router, mut openapi) = router.split_for_parts();
    openapi.tags = Some(vec![auth_tag, health_tag]);

    OpenApiRouter::with_openapi(openapi).merge(router.into())
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let Some(start) = author.find('<') else {
        let name = author.trim();
        return ((!name.is_empty()).then_some(name), None);
    };
    let name = author[..start].trim();
    let email = author[start + 1..].trim_end_matches('>').trim();
    (
        (!name.is_empty()).then_some(name),
        (!email.is_empty()).then_some(email),
    )
}
