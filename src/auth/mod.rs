//! Authentication: token issuance, the backend seam, the post-login
//! organization-resolution flow, and the access-control middleware.

pub mod backend;
pub mod callback;
pub mod magic_link;
pub mod middleware;
pub mod tokens;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{error, warn};

use crate::db::SessionTokens;

use backend::BackendError;

/// Access token (JWT) cookie name
pub const ACCESS_COOKIE: &str = "vestibule_access";
/// Opaque refresh token cookie name
pub const REFRESH_COOKIE: &str = "vestibule_refresh";

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Set the session token pair on the jar. The jar is an accumulator: every
/// step of the login flow returns an updated jar and the terminal redirect
/// merges it into the response, so no cookie mutation is silently dropped.
pub fn apply_session_cookies(jar: CookieJar, tokens: &SessionTokens) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, tokens.access_token.clone()))
        .add(session_cookie(REFRESH_COOKIE, tokens.refresh_token.clone()))
}

/// Remove the session cookies (sign-out).
pub fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::from(ACCESS_COOKIE))
        .remove(Cookie::from(REFRESH_COOKIE))
}

/// What to do when a lookup an authorization decision depends on fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPolicy {
    /// Fail open: log and carry on without the result. Used by login
    /// routing, where blocking login outright costs more than a missing
    /// organization claim.
    Proceed,
    /// Fail closed: propagate the failure. Used by admin authorization,
    /// where a false "allow" is a security breach.
    Deny,
}

/// Apply a [`LookupPolicy`] to a lookup result. `Ok(None)` means the lookup
/// failed but the policy says to proceed without it.
pub fn apply_policy<T>(
    what: &str,
    policy: LookupPolicy,
    result: Result<T, BackendError>,
) -> Result<Option<T>, BackendError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => match policy {
            LookupPolicy::Proceed => {
                warn!("{} failed, proceeding without it: {}", what, err);
                Ok(None)
            }
            LookupPolicy::Deny => {
                error!("{} failed, denying: {}", what, err);
                Err(err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proceed_policy_swallows_failures() {
        let result: Result<i32, BackendError> =
            Err(BackendError::Rejected("nope".to_string()));
        assert_eq!(
            apply_policy("lookup", LookupPolicy::Proceed, result).unwrap(),
            None
        );
    }

    #[test]
    fn deny_policy_propagates_failures() {
        let result: Result<i32, BackendError> =
            Err(BackendError::Rejected("nope".to_string()));
        assert!(apply_policy("lookup", LookupPolicy::Deny, result).is_err());
    }

    #[test]
    fn success_passes_through_either_policy() {
        for policy in [LookupPolicy::Proceed, LookupPolicy::Deny] {
            let result: Result<i32, BackendError> = Ok(7);
            assert_eq!(apply_policy("lookup", policy, result).unwrap(), Some(7));
        }
    }

    #[test]
    fn session_cookies_can_be_applied_and_cleared() {
        let tokens = SessionTokens {
            access_token: "jwt".to_string(),
            refresh_token: "opaque".to_string(),
            expires_at: String::new(),
        };
        let jar = apply_session_cookies(CookieJar::new(), &tokens);
        assert_eq!(jar.get(ACCESS_COOKIE).unwrap().value(), "jwt");
        assert_eq!(jar.get(REFRESH_COOKIE).unwrap().value(), "opaque");

        let jar = clear_session_cookies(jar);
        assert!(jar.get(ACCESS_COOKIE).is_none());
        assert!(jar.get(REFRESH_COOKIE).is_none());
    }
}
