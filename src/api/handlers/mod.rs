//! Route handlers for the session API.

pub mod admin;
pub mod auth;
pub mod health;
pub mod login;
pub mod onboarding;
pub mod session;

use axum::{
    body::Body,
    http::{
        HeaderValue, StatusCode,
        header::{InvalidHeaderValue, LOCATION, SET_COOKIE},
    },
    response::Response,
};
use regex::Regex;

use crate::api::error::ApiError;

/// Lightweight email sanity check applied before user lookups.
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Redirect to `location`, setting each cookie in order.
pub(crate) fn redirect_with_cookies(
    status: StatusCode,
    location: &str,
    cookies: Vec<HeaderValue>,
) -> Result<Response, ApiError> {
    let mut builder = Response::builder()
        .status(status)
        .header(LOCATION, HeaderValue::from_str(location).map_err(header_error)?);
    for cookie in cookies {
        builder = builder.header(SET_COOKIE, cookie);
    }
    builder
        .body(Body::empty())
        .map_err(|err| ApiError::Internal(err.into()))
}

pub(crate) fn header_error(err: InvalidHeaderValue) -> ApiError {
    ApiError::Internal(err.into())
}
