//! Session-scoped endpoints: the current user profile and explicit
//! organization selection (the organization picker's backend).

use axum::{extract::State, Json};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{apply_session_cookies, middleware::CurrentUser};
use crate::db::{OrganizationWithAccess, SelectOrganizationRequest, User, UserResponse};
use crate::AppState;

use super::error::ApiError;
use super::validation::validate_uuid;

/// Current user with their organization memberships
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
    pub organizations: Vec<OrganizationWithAccess>,
    pub active_organization_id: Option<String>,
}

/// GET /api/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<MeResponse>, ApiError> {
    let row: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let organizations = state.backend.list_user_organizations(&user.id).await?;

    Ok(Json(MeResponse {
        user: row.into(),
        organizations,
        active_organization_id: user.organization_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct SelectOrganizationResponse {
    pub organization_id: String,
}

/// POST /api/session/organization
///
/// Stamps the chosen organization into the session and rotates the token
/// pair so the new claim is visible immediately. The rotated cookies ride
/// back on the response.
pub async fn select_organization(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    jar: CookieJar,
    Json(req): Json<SelectOrganizationRequest>,
) -> Result<(CookieJar, Json<SelectOrganizationResponse>), ApiError> {
    if let Err(e) = validate_uuid(&req.organization_id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    // Membership is verified by the backend before the claim is stamped
    let tokens = state
        .backend
        .switch_organization(&user.session_id, &req.organization_id)
        .await?;

    let jar = apply_session_cookies(jar, &tokens);

    tracing::info!(
        user_id = %user.id,
        organization_id = %req.organization_id,
        "Active organization switched"
    );

    Ok((
        jar,
        Json(SelectOrganizationResponse {
            organization_id: req.organization_id,
        }),
    ))
}
