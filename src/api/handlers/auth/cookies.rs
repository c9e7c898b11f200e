//! `Set-Cookie` builders and `Cookie` header parsing.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};

use super::AuthConfig;
use crate::oidc::replay::STATE_COOKIE_TTL_SECONDS;

pub const STATE_COOKIE_NAME: &str = "state";

fn build(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age: i64,
    domain: Option<&str>,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if let Some(domain) = domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Session cookie holding `token` for `ttl_seconds`.
pub fn session_cookie(
    config: &AuthConfig,
    token: &str,
    ttl_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build(
        config,
        config.session_cookie_name(),
        token,
        ttl_seconds,
        config.session_cookie_domain(),
    )
}

pub fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build(
        config,
        config.session_cookie_name(),
        "",
        0,
        config.session_cookie_domain(),
    )
}

pub fn state_cookie(config: &AuthConfig, value: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build(config, STATE_COOKIE_NAME, value, STATE_COOKIE_TTL_SECONDS, None)
}

pub fn clear_state_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build(config, STATE_COOKIE_NAME, "", 0, None)
}

/// Expire a cookie set by another service on the shared domain.
pub fn clear_cookie(config: &AuthConfig, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build(config, name, "", 0, config.session_cookie_domain())
}

/// Value of cookie `name`, if present and non-empty.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}
