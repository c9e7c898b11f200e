//! Open-redirect guard for caller-supplied return URLs.

use url::{Origin, Url};

use crate::journey::LandingUrls;

/// `requested` when it shares an origin with one of the landing sites, otherwise the
/// applicant base URL.
#[must_use]
pub fn safe_redirect(requested: Option<&str>, landing: &LandingUrls) -> String {
    let allowed: Vec<Origin> = [&landing.frontend, &landing.admin, &landing.applicant]
        .into_iter()
        .filter_map(|base| Url::parse(base).ok())
        .map(|url| url.origin())
        .collect();

    requested
        .and_then(|requested| Url::parse(requested).ok())
        .filter(|url| allowed.contains(&url.origin()))
        .map_or_else(|| landing.applicant.clone(), String::from)
}

/// Whether the URL targets a generic not-found page.
#[must_use]
pub fn is_not_found_page(url: &str) -> bool {
    Url::parse(url).is_ok_and(|url| url.path().trim_end_matches('/').ends_with("/404"))
}
