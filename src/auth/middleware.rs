//! Access-control middleware for protected routes.
//!
//! Every request is intercepted to refresh the session transparently and to
//! redirect unauthenticated requests to the login path. Admin surfaces add a
//! privileged platform-admin lookup that fails closed: a lookup error denies,
//! the opposite policy from login routing.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{
    apply_policy, apply_session_cookies, tokens, LookupPolicy, ACCESS_COOKIE, REFRESH_COOKIE,
};
use crate::AppState;

/// The authenticated principal, inserted into request extensions by
/// [`session_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub session_id: String,
    /// Active organization claim from the access token, if one was stamped
    pub organization_id: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

fn login_redirect(state: &AppState) -> Response {
    Redirect::to(&state.config.redirects.login).into_response()
}

/// Authenticate the request from its cookies, refreshing the session
/// transparently when the access token has expired but the refresh token is
/// still good. Cookie rotations are merged into the response.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // Fast path: a valid access token carries everything we need
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        if let Ok(claims) =
            tokens::verify_access_token(&state.config.auth.jwt_secret, cookie.value())
        {
            request.extensions_mut().insert(CurrentUser {
                id: claims.sub,
                email: claims.email,
                session_id: claims.sid,
                organization_id: claims.org,
            });
            return next.run(request).await;
        }
    }

    // Access token missing or expired; try a transparent refresh
    let refresh_token = match jar.get(REFRESH_COOKIE) {
        Some(cookie) => cookie.value().to_string(),
        None => return login_redirect(&state),
    };

    let refreshed = match state.backend.refresh_session(&refresh_token).await {
        Ok(refreshed) => refreshed,
        Err(err) => {
            debug!("Session refresh failed: {}", err);
            return login_redirect(&state);
        }
    };

    let claims = match tokens::verify_access_token(
        &state.config.auth.jwt_secret,
        &refreshed.tokens.access_token,
    ) {
        Ok(claims) => claims,
        Err(_) => return login_redirect(&state),
    };

    request.extensions_mut().insert(CurrentUser {
        id: refreshed.user.id.clone(),
        email: refreshed.user.email.clone(),
        session_id: refreshed.session_id.clone(),
        organization_id: claims.org,
    });

    let jar = apply_session_cookies(jar, &refreshed.tokens);
    let response = next.run(request).await;
    // Carry the rotated cookies forward on whatever the handler produced
    (jar, response).into_response()
}

/// Gate for admin-only surfaces. The platform-admin flag is read with a
/// privileged lookup that bypasses membership scoping; on lookup failure or
/// a non-admin user the request is redirected to the unauthorized path.
pub async fn require_platform_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let user = match request.extensions().get::<CurrentUser>() {
        Some(user) => user.clone(),
        None => return login_redirect(&state),
    };

    let lookup: Result<Option<(bool,)>, _> =
        sqlx::query_as("SELECT is_platform_admin FROM users WHERE id = ?")
            .bind(&user.id)
            .fetch_optional(&state.db)
            .await
            .map_err(crate::auth::backend::BackendError::from);

    let is_admin = match apply_policy("Platform admin lookup", LookupPolicy::Deny, lookup) {
        Ok(Some(Some((flag,)))) => flag,
        // Unknown user or failed lookup: deny
        _ => false,
    };

    if !is_admin {
        return Redirect::to(&state.config.redirects.unauthorized).into_response();
    }

    next.run(request).await
}
