//! Organization invitation endpoints.
//!
//! Inviting someone creates a pending invitation row, stashes the invitation
//! context in the invitee's user metadata, and emails a one-time invite link.
//! The login callback finalizes the invitation when the link is followed; a
//! manual accept endpoint exists as a recovery path for logins that arrive
//! through other means.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::magic_link::{callback_link, find_or_create_user, insert_login_token};
use crate::auth::middleware::CurrentUser;
use crate::db::{
    CreateInvitationRequest, Invitation, InvitationResponse, InvitationStatus, LoginTokenKind,
    OrgRole, Organization,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::organizations::require_org_role;
use super::validation::{validate_email, validate_redirect_url, validate_role, validate_uuid};

fn validate_create_request(req: &CreateInvitationRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_email(&req.email) {
        errors.add("email", e);
    }

    if let Err(e) = validate_role(&req.role) {
        errors.add("role", e);
    }

    if let Err(e) = validate_redirect_url(&req.redirect_app_url) {
        errors.add("redirect_app_url", e);
    }

    errors.finish()
}

/// Create an invitation (admin+) and email the invite link
pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
    user: CurrentUser,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), ApiError> {
    if let Err(e) = validate_uuid(&organization_id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    validate_create_request(&req)?;

    let target_role: OrgRole = req
        .role
        .parse()
        .map_err(|e: String| ApiError::validation_field("role", e))?;

    let membership =
        require_org_role(&state.db, &organization_id, &user.id, OrgRole::Admin).await?;

    if !membership.role_enum().can_manage_member_role(target_role) {
        return Err(ApiError::forbidden(
            "You don't have permission to invite members with this role",
        ));
    }

    let organization =
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
            .bind(&organization_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Organization not found"))?;

    // Already a member?
    let invitee = find_or_create_user(&state.db, &req.email).await?;
    let existing = super::organizations::get_membership(&state.db, &organization_id, &invitee.id)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "User is already a member of this organization",
        ));
    }

    // One pending invitation per (organization, email)
    let pending: Option<Invitation> = sqlx::query_as(
        "SELECT * FROM invitations WHERE organization_id = ? AND email = ? AND status = 'pending'",
    )
    .bind(&organization_id)
    .bind(&req.email)
    .fetch_optional(&state.db)
    .await?;
    if let Some(pending) = pending {
        if !pending.is_expired() {
            return Err(ApiError::conflict(
                "An invitation for this email is already pending",
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now();
    let expires_at = now + chrono::Duration::days(state.config.auth.invitation_ttl_days);

    sqlx::query(
        r#"
        INSERT INTO invitations (id, organization_id, email, role, status, invited_at, expires_at, created_by, created_at)
        VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&organization_id)
    .bind(&req.email)
    .bind(target_role.to_string())
    .bind(now.to_rfc3339())
    .bind(expires_at.to_rfc3339())
    .bind(&user.id)
    .bind(now.to_rfc3339())
    .execute(&state.db)
    .await?;

    let invitation: Invitation = sqlx::query_as("SELECT * FROM invitations WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    // Stash the invitation context in the invitee's metadata bag; the login
    // callback reads it to finalize membership. Merged, not replaced, so
    // anything stashed earlier survives.
    let metadata = crate::auth::backend::merge_invitation_metadata(
        invitee.metadata(),
        &invitation,
        &organization.name,
        req.redirect_app_url.clone(),
    );
    let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
    sqlx::query("UPDATE users SET metadata = ? WHERE id = ?")
        .bind(metadata_json)
        .bind(&invitee.id)
        .execute(&state.db)
        .await?;

    // Invite tokens share the magic-link TTL scaled to the invitation window
    let token = insert_login_token(
        &state.db,
        &invitee.id,
        LoginTokenKind::Invite,
        state.config.auth.invitation_ttl_days * 24 * 60,
    )
    .await?;

    let link = callback_link(
        &state.config.server.public_url,
        &token,
        LoginTokenKind::Invite,
    );

    if state.mailer.is_enabled() {
        if let Err(err) = state
            .mailer
            .send_invitation_email(
                &req.email,
                &organization.name,
                &target_role.to_string(),
                &user.email,
                &link,
                state.config.auth.invitation_ttl_days,
            )
            .await
        {
            tracing::error!("Failed to send invitation email: {}", err);
        }
    } else {
        tracing::info!("Invitation link for {}: {}", req.email, link);
    }

    tracing::info!(
        "Invited {} to organization '{}' as {}",
        req.email,
        organization.name,
        target_role
    );

    let mut response = InvitationResponse::from(invitation);
    response.organization_name = Some(organization.name);

    Ok((StatusCode::CREATED, Json(response)))
}

/// List pending invitations for an organization (admin+)
pub async fn list_invitations(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Vec<InvitationResponse>>, ApiError> {
    if let Err(e) = validate_uuid(&organization_id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    require_org_role(&state.db, &organization_id, &user.id, OrgRole::Admin).await?;

    let invitations: Vec<Invitation> = sqlx::query_as(
        "SELECT * FROM invitations WHERE organization_id = ? AND status = 'pending' ORDER BY created_at DESC",
    )
    .bind(&organization_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        invitations.into_iter().map(InvitationResponse::from).collect(),
    ))
}

/// Revoke a pending invitation (admin+)
pub async fn revoke_invitation(
    State(state): State<Arc<AppState>>,
    Path((organization_id, invitation_id)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    if let Err(e) = validate_uuid(&organization_id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }
    if let Err(e) = validate_uuid(&invitation_id, "invitation_id") {
        return Err(ApiError::validation_field("invitation_id", e));
    }

    require_org_role(&state.db, &organization_id, &user.id, OrgRole::Admin).await?;

    let result = sqlx::query(
        "UPDATE invitations SET status = 'canceled' WHERE id = ? AND organization_id = ? AND status = 'pending'",
    )
    .bind(&invitation_id)
    .bind(&organization_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Pending invitation not found"));
    }

    tracing::info!("Revoked invitation {} by {}", invitation_id, user.email);

    Ok(StatusCode::NO_CONTENT)
}

/// Manually accept an invitation addressed to the current user.
///
/// Recovery path for sessions established outside the invite link (e.g. the
/// user signed in with a fresh magic link instead).
pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Path(invitation_id): Path<String>,
    user: CurrentUser,
) -> Result<Json<InvitationResponse>, ApiError> {
    if let Err(e) = validate_uuid(&invitation_id, "invitation_id") {
        return Err(ApiError::validation_field("invitation_id", e));
    }

    let invitation: Invitation = sqlx::query_as("SELECT * FROM invitations WHERE id = ?")
        .bind(&invitation_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    // Invitations are addressed to an email, not a user id
    if !invitation.email.eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::forbidden(
            "This invitation is addressed to a different email",
        ));
    }

    if invitation.status_enum() == InvitationStatus::Canceled {
        return Err(ApiError::bad_request("This invitation has been revoked"));
    }

    state
        .backend
        .finalize_invitation(&user.id, &invitation_id)
        .await?;

    let invitation: Invitation = sqlx::query_as("SELECT * FROM invitations WHERE id = ?")
        .bind(&invitation_id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(InvitationResponse::from(invitation)))
}
