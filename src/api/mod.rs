mod admin;
pub mod error;
mod invitations;
mod organizations;
mod processors;
mod session;
pub mod validation;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{callback, magic_link, middleware as auth_middleware};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/magic-link", post(magic_link::request_magic_link))
        .route("/callback", get(callback::auth_callback))
        .route("/sign-out", post(callback::sign_out));

    // Protected API routes
    let api_routes = Router::new()
        // Session
        .route("/me", get(session::me))
        .route("/session/organization", post(session::select_organization))
        // Organizations
        .route("/organizations", get(organizations::list_organizations))
        .route("/organizations", post(organizations::create_organization))
        .route("/organizations/:id", get(organizations::get_organization))
        .route("/organizations/:id", put(organizations::update_organization))
        .route("/organizations/:id", delete(organizations::delete_organization))
        .route("/organizations/:id/members", get(organizations::list_members))
        .route(
            "/organizations/:id/members/:user_id",
            put(organizations::update_member_role),
        )
        .route(
            "/organizations/:id/members/:user_id",
            delete(organizations::remove_member),
        )
        // Invitations
        .route(
            "/organizations/:id/invitations",
            post(invitations::create_invitation),
        )
        .route(
            "/organizations/:id/invitations",
            get(invitations::list_invitations),
        )
        .route(
            "/organizations/:id/invitations/:invitation_id",
            delete(invitations::revoke_invitation),
        )
        .route(
            "/invitations/:id/accept",
            post(invitations::accept_invitation),
        )
        // Processors
        .route("/processors", get(processors::list_processors))
        .route("/processors", post(processors::create_processor))
        .route("/processors/:id", get(processors::get_processor))
        .route("/processors/:id", put(processors::update_processor))
        .route("/processors/:id", delete(processors::delete_processor))
        .route("/processors/:id/runs", post(processors::execute_run))
        .route("/processors/:id/runs", get(processors::list_runs))
        .route("/processors/:id/runs/:run_id", get(processors::get_run));

    // Admin routes sit behind both the session middleware and the
    // fail-closed platform-admin gate
    let admin_routes = Router::new()
        .route("/organizations", get(admin::list_organizations))
        .route("/organizations/:id", patch(admin::update_organization))
        .route("/users", get(admin::list_users))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::require_platform_admin,
        ));

    let protected = api_routes
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::session_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth_routes)
        .nest("/api", protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::backend::SqliteAuthBackend;
    use crate::auth::{tokens, ACCESS_COOKIE, REFRESH_COOKIE};
    use crate::config::Config;
    use crate::db;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn test_app() -> (Router, Arc<AppState>) {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        let backend = Arc::new(SqliteAuthBackend::new(pool.clone(), config.auth.clone()));
        let state = Arc::new(AppState::new(config, pool, backend));
        (create_router(state.clone()), state)
    }

    async fn seed_user(state: &AppState, id: &str, email: &str, is_platform_admin: bool) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, email, name, is_platform_admin, metadata, created_at, updated_at)
             VALUES (?, ?, '', ?, '{}', ?, ?)",
        )
        .bind(id)
        .bind(email)
        .bind(is_platform_admin)
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await
        .unwrap();
    }

    fn access_cookie(state: &AppState, user_id: &str, email: &str) -> String {
        let token = tokens::mint_access_token(
            &state.config.auth.jwt_secret,
            user_id,
            email,
            "session-1",
            None,
            600,
        )
        .unwrap();
        format!("{}={}", ACCESS_COOKIE, token)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthenticated_api_requests_redirect_to_login() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/login");
    }

    #[tokio::test]
    async fn admin_routes_sit_behind_the_session_gate_too() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/login");
    }

    #[tokio::test]
    async fn non_admin_users_are_turned_away_from_admin_routes() {
        let (app, state) = test_app().await;
        seed_user(&state, "u1", "plain@user.test", false).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .header("cookie", access_cookie(&state, "u1", "plain@user.test"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/unauthorized");
    }

    #[tokio::test]
    async fn platform_admins_pass_the_admin_gate() {
        let (app, state) = test_app().await;
        seed_user(&state, "u1", "root@user.test", true).await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .header("cookie", access_cookie(&state, "u1", "root@user.test"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_gate_denies_when_the_flag_lookup_fails() {
        let (app, state) = test_app().await;
        seed_user(&state, "u1", "root@user.test", true).await;
        // A valid access token sails past the session middleware without
        // touching the database; the gate's own lookup is the first query
        // to hit the closed pool and must deny, not wave the request on
        let cookie = access_cookie(&state, "u1", "root@user.test");
        state.db.close().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .header("cookie", cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get("location").unwrap(), "/unauthorized");
    }

    #[tokio::test]
    async fn missing_access_token_is_refreshed_from_the_refresh_cookie() {
        let (app, state) = test_app().await;
        seed_user(&state, "u1", "back@user.test", false).await;
        let now = chrono::Utc::now();
        let expires = (now + chrono::Duration::days(7)).to_rfc3339();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_token_hash, active_organization_id, expires_at, revoked_at, created_at)
             VALUES ('s1', 'u1', ?, NULL, ?, NULL, ?)",
        )
        .bind(tokens::hash_token("refresh-1"))
        .bind(&expires)
        .bind(now.to_rfc3339())
        .execute(&state.db)
        .await
        .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header("cookie", format!("{}=refresh-1", REFRESH_COOKIE))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Both cookies are rotated onto the response
        let cookies: Vec<_> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with(ACCESS_COOKIE)));
        let rotated = cookies
            .iter()
            .find(|c| c.starts_with(REFRESH_COOKIE))
            .expect("refresh cookie rotated");
        assert!(!rotated.contains("refresh-1"));
    }

    #[tokio::test]
    async fn magic_link_request_records_a_login_token() {
        let (app, state) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/magic-link")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"email":"new@user.test"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM login_tokens")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn callback_without_credentials_is_an_error_redirect() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.starts_with("/auth/error?error="));
    }
}
