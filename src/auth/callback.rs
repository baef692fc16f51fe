//! Post-authentication organization-resolution flow.
//!
//! Every magic-link or code login lands on `GET /auth/callback`, which
//! exchanges the one-time credential for a session and then decides where to
//! send the user: finalize a pending invitation, or route by how many
//! organizations they belong to (0 → sign out, 1 → silent switch, many →
//! picker). The handler produces exactly one terminal redirect per
//! invocation, with the cookie jar threaded through every step.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::backend::AuthBackend;
use crate::auth::{
    apply_policy, apply_session_cookies, clear_session_cookies, tokens, LookupPolicy,
    ACCESS_COOKIE,
};
use crate::config::RedirectConfig;
use crate::db::{LoginTokenKind, UserMetadata};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
    pub error: Option<String>,
}

/// Why this login happened, resolved once from the user's metadata bag
/// instead of consulting it piecemeal through the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginContext {
    Invitation {
        invitation_id: String,
        redirect_app_url: Option<String>,
    },
    Direct,
}

impl LoginContext {
    pub fn resolve(metadata: &UserMetadata) -> Self {
        match &metadata.invitation_id {
            Some(invitation_id) => LoginContext::Invitation {
                invitation_id: invitation_id.clone(),
                redirect_app_url: metadata.redirect_app_url.clone(),
            },
            None => LoginContext::Direct,
        }
    }
}

/// The single terminal redirect of a callback invocation, carrying the
/// accumulated cookie mutations.
#[derive(Debug)]
pub struct CallbackOutcome {
    pub jar: CookieJar,
    pub location: String,
}

impl CallbackOutcome {
    fn to(jar: CookieJar, location: impl Into<String>) -> Self {
        Self {
            jar,
            location: location.into(),
        }
    }
}

impl IntoResponse for CallbackOutcome {
    fn into_response(self) -> Response {
        (self.jar, Redirect::to(&self.location)).into_response()
    }
}

fn error_redirect(jar: CookieJar, redirects: &RedirectConfig, message: &str) -> CallbackOutcome {
    let location = format!(
        "{}?error={}",
        redirects.error_base,
        urlencoding::encode(message)
    );
    CallbackOutcome::to(jar, location)
}

/// Append `welcome=true` to a path that may already carry a query string.
fn with_welcome(path: &str) -> String {
    if path.contains('?') {
        format!("{}&welcome=true", path)
    } else {
        format!("{}?welcome=true", path)
    }
}

/// `scheme://host[:port]` of an absolute URL, ignoring path and query.
fn origin(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")?;
    let authority = &url[scheme_end + 3..];
    let end = authority
        .find(['/', '?', '#'])
        .map(|i| scheme_end + 3 + i)
        .unwrap_or(url.len());
    Some(&url[..end])
}

fn same_origin(a: &str, b: &str) -> bool {
    match (origin(a), origin(b)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => a.trim_end_matches('/') == b.trim_end_matches('/'),
    }
}

/// GET /auth/callback
pub async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    resolve_callback(
        state.backend.as_ref(),
        &state.config.redirects,
        &state.config.server.public_url,
        params,
        jar,
    )
    .await
    .into_response()
}

/// The full flow, written against the backend seam so the routing rules are
/// testable without a database.
pub async fn resolve_callback(
    backend: &dyn AuthBackend,
    redirects: &RedirectConfig,
    public_url: &str,
    params: CallbackParams,
    jar: CookieJar,
) -> CallbackOutcome {
    // Provider-reported errors short-circuit before any exchange
    if let Some(message) = params.error {
        return error_redirect(jar, redirects, &message);
    }

    let exchange = if let Some(code) = params.code {
        backend.exchange_code(&code).await
    } else if let Some(token) = params.token_hash {
        let kind = match params.link_type.as_deref().unwrap_or("magiclink").parse::<LoginTokenKind>() {
            Ok(kind) => kind,
            Err(message) => return error_redirect(jar, redirects, &message),
        };
        backend.verify_token_hash(&token, kind).await
    } else {
        // No credential at all: never attempt an exchange
        return error_redirect(jar, redirects, "Missing authorization code");
    };

    let login = match exchange {
        Ok(login) => login,
        // Identity-establishing failure: terminal, no session cookies
        Err(err) => return error_redirect(jar, redirects, &err.to_string()),
    };

    info!(user = %login.user.id, "Login established");
    let jar = apply_session_cookies(jar, &login.tokens);

    match LoginContext::resolve(&login.user.metadata()) {
        LoginContext::Invitation {
            invitation_id,
            redirect_app_url,
        } => {
            resolve_invitation(
                backend,
                redirects,
                public_url,
                &login,
                &invitation_id,
                redirect_app_url,
                jar,
            )
            .await
        }
        LoginContext::Direct => route_by_organization_count(backend, redirects, &login, jar).await,
    }
}

/// Finalize a pending invitation for a freshly authenticated user.
///
/// Finalize failures never strand the user on an error page: the invitation
/// stays resolvable later through the manual accept path, so we log and
/// redirect anyway.
async fn resolve_invitation(
    backend: &dyn AuthBackend,
    redirects: &RedirectConfig,
    public_url: &str,
    login: &crate::auth::backend::AuthenticatedLogin,
    invitation_id: &str,
    redirect_app_url: Option<String>,
    jar: CookieJar,
) -> CallbackOutcome {
    let mut jar = jar;

    match backend
        .finalize_invitation(&login.user.id, invitation_id)
        .await
    {
        Ok(()) => {
            // Refresh so the access token reflects the new membership
            match backend.refresh_session(&login.tokens.refresh_token).await {
                Ok(refreshed) => {
                    jar = apply_session_cookies(jar, &refreshed.tokens);
                }
                Err(err) => {
                    warn!(invitation = %invitation_id, "Session refresh after invitation failed: {}", err);
                }
            }
            info!(user = %login.user.id, invitation = %invitation_id, "Invitation finalized");
        }
        Err(err) => {
            warn!(invitation = %invitation_id, "Invitation finalize failed, continuing login: {}", err);
        }
    }

    let welcome = with_welcome(&redirects.success);
    match redirect_app_url {
        Some(app_url) if !same_origin(&app_url, public_url) => {
            CallbackOutcome::to(jar, format!("{}{}", app_url.trim_end_matches('/'), welcome))
        }
        _ => CallbackOutcome::to(jar, welcome),
    }
}

/// Route an existing (non-invited) user by organization cardinality.
async fn route_by_organization_count(
    backend: &dyn AuthBackend,
    redirects: &RedirectConfig,
    login: &crate::auth::backend::AuthenticatedLogin,
    jar: CookieJar,
) -> CallbackOutcome {
    let lookup = backend.list_user_organizations(&login.user.id).await;
    let organizations = match apply_policy("Organization lookup", LookupPolicy::Proceed, lookup) {
        Ok(Some(organizations)) => organizations,
        // Fail open: downstream access control enforces correctness
        _ => return CallbackOutcome::to(jar, redirects.success.clone()),
    };

    match organizations.len() {
        0 => {
            // A session without organization context is unusable platform-wide
            if let Err(err) = backend.sign_out(&login.session_id).await {
                warn!(user = %login.user.id, "Sign-out of organization-less session failed: {}", err);
            }
            let jar = clear_session_cookies(jar);
            CallbackOutcome::to(jar, redirects.no_organization.clone())
        }
        1 => {
            let organization = &organizations[0].organization;
            let mut jar = jar;
            match backend
                .switch_organization(&login.session_id, &organization.id)
                .await
            {
                Ok(fresh) => {
                    jar = apply_session_cookies(jar, &fresh);
                    info!(user = %login.user.id, organization = %organization.id, "Auto-selected sole organization");
                }
                Err(err) => {
                    // Claims catch up on the next refresh
                    warn!(organization = %organization.id, "Organization switch failed, continuing login: {}", err);
                }
            }
            CallbackOutcome::to(jar, redirects.success.clone())
        }
        _ => CallbackOutcome::to(jar, redirects.organization_picker.clone()),
    }
}

/// POST /auth/sign-out
pub async fn sign_out(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        if let Ok(claims) =
            tokens::verify_access_token(&state.config.auth.jwt_secret, cookie.value())
        {
            if let Err(err) = state.backend.sign_out(&claims.sid).await {
                warn!(session = %claims.sid, "Sign-out failed: {}", err);
            }
        }
    }
    let jar = clear_session_cookies(jar);
    (jar, Redirect::to(&state.config.redirects.login)).into_response()
}
