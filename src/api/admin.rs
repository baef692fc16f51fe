//! Platform-admin endpoints. These sit behind the fail-closed admin
//! middleware; handlers assume the caller is already authorized.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Organization, User, UserResponse};
use crate::AppState;

use super::error::ApiError;
use super::organizations::set_organization_apps;
use super::validation::validate_uuid;

/// Apps the platform can grant an organization access to
const VALID_APPS: [&str; 3] = ["admin", "validai", "testapp"];

/// Organization with a member count and app access set, for the admin listing
#[derive(Debug, Serialize)]
pub struct AdminOrganization {
    #[serde(flatten)]
    pub organization: Organization,
    pub member_count: i64,
    pub apps: Vec<String>,
}

/// GET /api/admin/organizations
pub async fn list_organizations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AdminOrganization>>, ApiError> {
    let organizations: Vec<Organization> =
        sqlx::query_as("SELECT * FROM organizations ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?;

    let mut results = Vec::new();
    for organization in organizations {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM organization_members WHERE organization_id = ?")
                .bind(&organization.id)
                .fetch_one(&state.db)
                .await?;
        let apps: Vec<(String,)> = sqlx::query_as(
            "SELECT app FROM organization_apps WHERE organization_id = ? ORDER BY app",
        )
        .bind(&organization.id)
        .fetch_all(&state.db)
        .await?;
        results.push(AdminOrganization {
            organization,
            member_count: count.0,
            apps: apps.into_iter().map(|(app,)| app).collect(),
        });
    }

    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct AdminUpdateOrganizationRequest {
    pub is_active: Option<bool>,
    pub subscription_tier: Option<String>,
    /// When present, replaces the organization's app access set
    pub apps: Option<Vec<String>>,
}

const VALID_TIERS: [&str; 3] = ["free", "pro", "enterprise"];

/// PATCH /api/admin/organizations/{id}
pub async fn update_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateOrganizationRequest>,
) -> Result<Json<Organization>, ApiError> {
    if let Err(e) = validate_uuid(&id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    if let Some(ref tier) = req.subscription_tier {
        if !VALID_TIERS.contains(&tier.as_str()) {
            return Err(ApiError::validation_field(
                "subscription_tier",
                format!("Invalid tier. Must be one of: {}", VALID_TIERS.join(", ")),
            ));
        }
    }

    if let Some(ref apps) = req.apps {
        for app in apps {
            if !VALID_APPS.contains(&app.as_str()) {
                return Err(ApiError::validation_field(
                    "apps",
                    format!("Unknown app '{}'. Must be one of: {}", app, VALID_APPS.join(", ")),
                ));
            }
        }
    }

    let now = chrono::Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE organizations SET
            is_active = COALESCE(?, is_active),
            subscription_tier = COALESCE(?, subscription_tier),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.is_active)
    .bind(&req.subscription_tier)
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Organization not found"));
    }

    if let Some(ref apps) = req.apps {
        set_organization_apps(&state.db, &id, apps).await?;
    }

    let organization: Organization = sqlx::query_as("SELECT * FROM organizations WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(
        organization_id = %id,
        is_active = organization.is_active,
        tier = %organization.subscription_tier,
        "Organization updated by platform admin"
    );

    Ok(Json(organization))
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::backend::SqliteAuthBackend;
    use crate::config::Config;
    use crate::db;
    use uuid::Uuid;

    async fn test_state() -> Arc<AppState> {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        let backend = Arc::new(SqliteAuthBackend::new(pool.clone(), config.auth.clone()));
        Arc::new(AppState::new(config, pool, backend))
    }

    async fn seed_org(state: &AppState) -> String {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, is_active, subscription_tier, created_at, updated_at)
             VALUES (?, 'Acme', 'acme', 1, 'free', ?, ?)",
        )
        .bind(&id)
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await
        .unwrap();
        set_organization_apps(&state.db, &id, &["validai".to_string()])
            .await
            .unwrap();
        id
    }

    async fn apps_of(state: &AppState, id: &str) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT app FROM organization_apps WHERE organization_id = ? ORDER BY app",
        )
        .bind(id)
        .fetch_all(&state.db)
        .await
        .unwrap();
        rows.into_iter().map(|(app,)| app).collect()
    }

    #[tokio::test]
    async fn patch_replaces_the_app_access_set() {
        let state = test_state().await;
        let id = seed_org(&state).await;

        update_organization(
            State(state.clone()),
            Path(id.clone()),
            Json(AdminUpdateOrganizationRequest {
                is_active: None,
                subscription_tier: None,
                apps: Some(vec!["admin".to_string(), "testapp".to_string()]),
            }),
        )
        .await
        .unwrap();

        assert_eq!(apps_of(&state, &id).await, vec!["admin", "testapp"]);
    }

    #[tokio::test]
    async fn unknown_apps_are_rejected_and_nothing_changes() {
        let state = test_state().await;
        let id = seed_org(&state).await;

        let result = update_organization(
            State(state.clone()),
            Path(id.clone()),
            Json(AdminUpdateOrganizationRequest {
                is_active: None,
                subscription_tier: None,
                apps: Some(vec!["billing".to_string()]),
            }),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(apps_of(&state, &id).await, vec!["validai"]);
    }

    #[tokio::test]
    async fn listing_reports_the_app_set() {
        let state = test_state().await;
        seed_org(&state).await;

        let Json(organizations) = list_organizations(State(state.clone())).await.unwrap();
        assert_eq!(organizations.len(), 1);
        assert_eq!(organizations[0].apps, vec!["validai"]);
        assert_eq!(organizations[0].member_count, 0);
    }
}
