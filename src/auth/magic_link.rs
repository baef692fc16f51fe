//! Magic-link issuance: the passwordless entry point.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;
use crate::api::validation::validate_email;
use crate::auth::tokens::{generate_token, hash_token};
use crate::db::{LoginTokenKind, User};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
    /// Application origin the login originated from, carried through the
    /// metadata bag so the callback can route back to it.
    #[serde(default)]
    pub redirect_app_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MagicLinkResponse {
    pub sent: bool,
}

/// Build the callback link carried in a login email.
pub fn callback_link(public_url: &str, token: &str, kind: LoginTokenKind) -> String {
    format!(
        "{}/auth/callback?token_hash={}&type={}",
        public_url.trim_end_matches('/'),
        token,
        kind
    )
}

/// Insert a one-time login token row and return the raw token.
pub async fn insert_login_token(
    pool: &crate::db::DbPool,
    user_id: &str,
    kind: LoginTokenKind,
    ttl_minutes: i64,
) -> Result<String, sqlx::Error> {
    let token = generate_token();
    let now = chrono::Utc::now();

    sqlx::query(
        "INSERT INTO login_tokens (id, user_id, token_hash, kind, expires_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(kind.to_string())
    .bind((now + chrono::Duration::minutes(ttl_minutes)).to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(token)
}

/// Find a user by email or create one on first login.
pub async fn find_or_create_user(
    pool: &crate::db::DbPool,
    email: &str,
) -> Result<User, sqlx::Error> {
    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if let Some(user) = existing {
        return Ok(user);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO users (id, email, name, is_platform_admin, metadata, created_at, updated_at)
         VALUES (?, ?, '', 0, '{}', ?, ?)",
    )
    .bind(&id)
    .bind(email)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
}

/// POST /auth/magic-link
pub async fn request_magic_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MagicLinkRequest>,
) -> Result<Json<MagicLinkResponse>, ApiError> {
    validate_email(&req.email).map_err(|e| ApiError::validation_field("email", e))?;

    let user = find_or_create_user(&state.db, &req.email).await?;

    if let Some(app_url) = &req.redirect_app_url {
        let mut metadata = user.metadata();
        metadata.redirect_app_url = Some(app_url.clone());
        let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
        sqlx::query("UPDATE users SET metadata = ? WHERE id = ?")
            .bind(metadata_json)
            .bind(&user.id)
            .execute(&state.db)
            .await?;
    }

    let token = insert_login_token(
        &state.db,
        &user.id,
        LoginTokenKind::Magiclink,
        state.config.auth.magic_link_ttl_minutes,
    )
    .await?;

    let link = callback_link(&state.config.server.public_url, &token, LoginTokenKind::Magiclink);

    if state.mailer.is_enabled() {
        if let Err(err) = state
            .mailer
            .send_magic_link_email(&req.email, &link, state.config.auth.magic_link_ttl_minutes)
            .await
        {
            tracing::error!("Failed to send magic link email: {}", err);
            return Err(ApiError::internal("Failed to send login email"));
        }
    } else {
        // Dev convenience when SMTP is not configured
        info!("Magic link for {}: {}", req.email, link);
    }

    Ok(Json(MagicLinkResponse { sent: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn callback_link_shape() {
        let link = callback_link("http://localhost:8080/", "tok", LoginTokenKind::Magiclink);
        assert_eq!(
            link,
            "http://localhost:8080/auth/callback?token_hash=tok&type=magiclink"
        );
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_per_email() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let a = find_or_create_user(&pool, "a@b.c").await.unwrap();
        let b = find_or_create_user(&pool, "a@b.c").await.unwrap();
        assert_eq!(a.id, b.id);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
