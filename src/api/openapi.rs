use super::handlers::{admin, health, login, onboarding, session};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut sesame_tag = Tag::new("sesame");
    sesame_tag.description = Some("Identity and session API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login handshake, sessions and onboarding".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Operator maintenance endpoints".to_string());

    // utoipa-axum 0.1 has no `get_openapi_mut`; `routes` never touches `tags`,
    // so setting them on the base document is equivalent.
    let mut base = cargo_openapi();
    base.tags = Some(vec![sesame_tag, auth_tag, admin_tag]);

    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(login::login))
        .routes(routes!(login::redirect_after_login))
        .routes(routes!(login::logout))
        .routes(routes!(session::validate_sessions_roles))
        .routes(routes!(session::is_user_logged_in))
        .routes(routes!(session::refresh_token_get, session::refresh_token_post))
        .routes(routes!(
            onboarding::privacy_policy,
            onboarding::accept_privacy_policy
        ))
        .routes(routes!(onboarding::updated_email))
        .routes(routes!(admin::purge_revoked));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
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
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        Some(value.trim()).filter(|value| !value.is_empty())
    }

    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));

        let contact = doc.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Sesame"));
            assert_eq!(contact.email.as_deref(), Some("team@sesame.dev"));
        }

        let license = doc.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let doc = openapi();
        let tags = doc.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        for path in [
            "/login",
            "/redirect-after-login",
            "/logout",
            "/validate-sessions-roles",
            "/is-user-logged-in",
            "/privacy-policy",
            "/updated-email",
            "/refresh-token",
            "/admin/purge-revoked",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn parse_author_splits_name_and_email() {
        assert_eq!(
            parse_author("Team Sesame <team@sesame.dev>"),
            (Some("Team Sesame"), Some("team@sesame.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
    }
}
