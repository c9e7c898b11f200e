//! # Sesame (identity and session core)
//!
//! `sesame` runs the OpenID Connect login handshake against the external identity
//! provider, issues session tokens signed by Vault transit, and moves every user
//! through the onboarding journey before handing them to their landing page.
//!
//! ## Session tokens
//!
//! Tokens are three base64url segments (`header.claims.signature`). The private
//! key never leaves Vault: issuance and verification both call the transit engine
//! over the exact `header.claims` bytes. Verification results of the remote call are
//! memoized in a bounded cache; revocation and user state are checked on every call.
//!
//! ## Login handshake
//!
//! Each login attempt persists a nonce and a salt. The `state` sent to the provider is
//! an HMAC of the state cookie keyed by the salt, so a callback only succeeds when it
//! carries the cookie, the matching hash and the unused nonce together. Records are
//! consumed with atomic compare-and-delete statements.
//!
//! ## Login journey
//!
//! After identity is established the journey state machine accepts the privacy policy,
//! links the user in the downstream Apply and Find services, and resolves the landing
//! URL from the highest role. Downstream failures are recorded on the user and retried
//! on the next login.

pub mod api;
pub mod cli;
pub mod journey;
pub mod jwt;
pub mod legacy;
pub mod oidc;
pub mod store;
pub mod token;
pub mod users;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn unix_now_is_after_2020() {
        assert!(unix_now() > 1_577_836_800);
    }
}
