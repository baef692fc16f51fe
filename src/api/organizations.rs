//! Organization API endpoints with role-based access control.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::CurrentUser;
use crate::db::{
    CreateOrganizationRequest, Membership, MembershipWithUser, OrgRole, Organization,
    OrganizationWithAccess, UpdateMemberRoleRequest, UpdateOrganizationRequest,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_org_name, validate_role, validate_slug, validate_uuid};

/// Generate a URL-friendly slug from a name
pub fn generate_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Apps every new organization can use out of the box; the platform admin
/// console can widen or narrow the set later.
pub(crate) const DEFAULT_APPS: &[&str] = &["validai"];

/// Replace an organization's app access set.
pub(crate) async fn set_organization_apps(
    pool: &crate::db::DbPool,
    organization_id: &str,
    apps: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM organization_apps WHERE organization_id = ?")
        .bind(organization_id)
        .execute(pool)
        .await?;
    for app in apps {
        sqlx::query(
            "INSERT INTO organization_apps (organization_id, app) VALUES (?, ?)
             ON CONFLICT(organization_id, app) DO NOTHING",
        )
        .bind(organization_id)
        .bind(app)
        .execute(pool)
        .await?;
    }
    Ok(())
}

fn validate_create_request(req: &CreateOrganizationRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_org_name(&req.name) {
        errors.add("name", e);
    }

    if let Some(ref slug) = req.slug {
        if let Err(e) = validate_slug(slug) {
            errors.add("slug", e);
        }
    }

    errors.finish()
}

fn validate_update_request(req: &UpdateOrganizationRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(ref name) = req.name {
        if let Err(e) = validate_org_name(name) {
            errors.add("name", e);
        }
    }

    if let Some(ref slug) = req.slug {
        if let Err(e) = validate_slug(slug) {
            errors.add("slug", e);
        }
    }

    errors.finish()
}

/// Get the current user's membership in an organization
pub async fn get_membership(
    pool: &crate::db::DbPool,
    organization_id: &str,
    user_id: &str,
) -> Result<Option<Membership>, sqlx::Error> {
    sqlx::query_as::<_, Membership>(
        "SELECT * FROM organization_members WHERE organization_id = ? AND user_id = ?",
    )
    .bind(organization_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Require that the current user has at least the specified role in the
/// organization
pub async fn require_org_role(
    pool: &crate::db::DbPool,
    organization_id: &str,
    user_id: &str,
    required_role: OrgRole,
) -> Result<Membership, ApiError> {
    let membership = get_membership(pool, organization_id, user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden("You are not a member of this organization"))?;

    let user_role = membership.role_enum();
    if !user_role.has_at_least(required_role) {
        return Err(ApiError::forbidden(format!(
            "This action requires {} role or higher",
            required_role
        )));
    }

    Ok(membership)
}

async fn count_owners(
    pool: &crate::db::DbPool,
    organization_id: &str,
) -> Result<i64, sqlx::Error> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM organization_members WHERE organization_id = ? AND role = 'owner'",
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await?;
    Ok(count.0)
}

async fn fetch_members(
    pool: &crate::db::DbPool,
    organization_id: &str,
) -> Result<Vec<MembershipWithUser>, sqlx::Error> {
    sqlx::query_as::<_, MembershipWithUser>(
        r#"
        SELECT om.id, om.organization_id, om.user_id, om.role, om.created_at,
               u.name as user_name, u.email as user_email
        FROM organization_members om
        INNER JOIN users u ON om.user_id = u.id
        WHERE om.organization_id = ?
        ORDER BY
            CASE om.role
                WHEN 'owner' THEN 1
                WHEN 'admin' THEN 2
                WHEN 'member' THEN 3
                WHEN 'viewer' THEN 4
            END,
            om.created_at ASC
        "#,
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await
}

/// Organization with its member list
#[derive(Debug, Serialize)]
pub struct OrganizationDetail {
    #[serde(flatten)]
    pub organization: Organization,
    pub members: Vec<MembershipWithUser>,
}

/// List organizations the current user belongs to
pub async fn list_organizations(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<OrganizationWithAccess>>, ApiError> {
    let organizations = state.backend.list_user_organizations(&user.id).await?;
    Ok(Json(organizations))
}

/// Get a specific organization with its members
pub async fn get_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<Json<OrganizationDetail>, ApiError> {
    if let Err(e) = validate_uuid(&id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    require_org_role(&state.db, &id, &user.id, OrgRole::Viewer).await?;

    let organization =
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Organization not found"))?;

    let members = fetch_members(&state.db, &id).await?;

    Ok(Json(OrganizationDetail {
        organization,
        members,
    }))
}

/// Create a new organization; the creator becomes its owner
pub async fn create_organization(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), ApiError> {
    validate_create_request(&req)?;

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let slug = req.slug.unwrap_or_else(|| generate_slug(&req.name));

    // The generated slug can still be invalid (e.g. a name with no
    // alphanumerics), so check it either way
    validate_slug(&slug).map_err(|e| ApiError::validation_field("slug", e))?;

    sqlx::query(
        r#"
        INSERT INTO organizations (id, name, slug, is_active, subscription_tier, created_at, updated_at)
        VALUES (?, ?, ?, 1, 'free', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&req.name)
    .bind(&slug)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create organization: {}", e);
        if e.to_string().contains("UNIQUE constraint failed") {
            ApiError::conflict("An organization with this slug already exists")
        } else {
            ApiError::database("Failed to create organization")
        }
    })?;

    sqlx::query(
        r#"
        INSERT INTO organization_members (id, organization_id, user_id, role, created_at)
        VALUES (?, ?, ?, 'owner', ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&id)
    .bind(&user.id)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to add organization owner: {}", e);
        ApiError::database("Failed to create organization membership")
    })?;

    // Grant the default app set so the organization is usable immediately
    let apps: Vec<String> = DEFAULT_APPS.iter().map(|s| s.to_string()).collect();
    set_organization_apps(&state.db, &id, &apps).await?;

    let organization =
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
            .bind(&id)
            .fetch_one(&state.db)
            .await?;

    tracing::info!(
        "Created organization '{}' with owner {}",
        organization.name,
        user.email
    );

    Ok((StatusCode::CREATED, Json(organization)))
}

/// Update an organization (admin+)
pub async fn update_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
    Json(req): Json<UpdateOrganizationRequest>,
) -> Result<Json<Organization>, ApiError> {
    if let Err(e) = validate_uuid(&id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    validate_update_request(&req)?;

    require_org_role(&state.db, &id, &user.id, OrgRole::Admin).await?;

    let now = chrono::Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE organizations SET
            name = COALESCE(?, name),
            slug = COALESCE(?, slug),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&req.name)
    .bind(&req.slug)
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to update organization: {}", e);
        if e.to_string().contains("UNIQUE constraint failed") {
            ApiError::conflict("An organization with this slug already exists")
        } else {
            ApiError::database("Failed to update organization")
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Organization not found"));
    }

    let organization =
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
            .bind(&id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(organization))
}

/// Delete an organization (owner only)
pub async fn delete_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    if let Err(e) = validate_uuid(&id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    let membership = require_org_role(&state.db, &id, &user.id, OrgRole::Owner).await?;
    if !membership.role_enum().can_delete_organization() {
        return Err(ApiError::forbidden(
            "Only owners can delete an organization",
        ));
    }

    // Members, invitations, and processors cascade
    let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Organization not found"));
    }

    tracing::info!("Deleted organization {} by user {}", id, user.email);

    Ok(StatusCode::NO_CONTENT)
}

/// List organization members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    user: CurrentUser,
) -> Result<Json<Vec<MembershipWithUser>>, ApiError> {
    if let Err(e) = validate_uuid(&id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }

    require_org_role(&state.db, &id, &user.id, OrgRole::Viewer).await?;

    let members = fetch_members(&state.db, &id).await?;

    Ok(Json(members))
}

/// Update a member's role
pub async fn update_member_role(
    State(state): State<Arc<AppState>>,
    Path((organization_id, user_id)): Path<(String, String)>,
    user: CurrentUser,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<MembershipWithUser>, ApiError> {
    if let Err(e) = validate_uuid(&organization_id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }
    if let Err(e) = validate_uuid(&user_id, "user_id") {
        return Err(ApiError::validation_field("user_id", e));
    }

    validate_role(&req.role).map_err(|e| ApiError::validation_field("role", e))?;
    let new_role: OrgRole = req
        .role
        .parse()
        .map_err(|e: String| ApiError::validation_field("role", e))?;

    let membership =
        require_org_role(&state.db, &organization_id, &user.id, OrgRole::Admin).await?;
    let user_role = membership.role_enum();

    let target_membership = get_membership(&state.db, &organization_id, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization member not found"))?;
    let target_current_role = target_membership.role_enum();

    if !user_role.can_manage_member_role(target_current_role) {
        return Err(ApiError::forbidden(
            "You don't have permission to modify this member",
        ));
    }

    if !user_role.can_manage_member_role(new_role) {
        return Err(ApiError::forbidden(
            "You don't have permission to assign this role",
        ));
    }

    // Cannot demote the last owner
    if target_current_role == OrgRole::Owner && new_role != OrgRole::Owner {
        if count_owners(&state.db, &organization_id).await? <= 1 {
            return Err(ApiError::bad_request(
                "Cannot change the role of the last owner. Assign another owner first.",
            ));
        }
    }

    sqlx::query(
        "UPDATE organization_members SET role = ? WHERE organization_id = ? AND user_id = ?",
    )
    .bind(new_role.to_string())
    .bind(&organization_id)
    .bind(&user_id)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to update member role: {}", e);
        ApiError::database("Failed to update member role")
    })?;

    let member = sqlx::query_as::<_, MembershipWithUser>(
        r#"
        SELECT om.id, om.organization_id, om.user_id, om.role, om.created_at,
               u.name as user_name, u.email as user_email
        FROM organization_members om
        INNER JOIN users u ON om.user_id = u.id
        WHERE om.organization_id = ? AND om.user_id = ?
        "#,
    )
    .bind(&organization_id)
    .bind(&user_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        "Updated {}'s role to {} in organization {}",
        member.user_email,
        member.role,
        organization_id
    );

    Ok(Json(member))
}

/// Remove a member from an organization. Self-removal (leaving) is allowed
/// for any role; removing others requires admin+.
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((organization_id, user_id)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    if let Err(e) = validate_uuid(&organization_id, "organization_id") {
        return Err(ApiError::validation_field("organization_id", e));
    }
    if let Err(e) = validate_uuid(&user_id, "user_id") {
        return Err(ApiError::validation_field("user_id", e));
    }

    let target_membership = get_membership(&state.db, &organization_id, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization member not found"))?;
    let target_role = target_membership.role_enum();

    if user_id != user.id {
        let membership =
            require_org_role(&state.db, &organization_id, &user.id, OrgRole::Admin).await?;

        if !membership.role_enum().can_manage_member_role(target_role) {
            return Err(ApiError::forbidden(
                "You don't have permission to remove this member",
            ));
        }
    }

    // Cannot remove the last owner
    if target_role == OrgRole::Owner && count_owners(&state.db, &organization_id).await? <= 1 {
        return Err(ApiError::bad_request(
            "Cannot remove the last owner. Assign another owner first or delete the organization.",
        ));
    }

    let result =
        sqlx::query("DELETE FROM organization_members WHERE organization_id = ? AND user_id = ?")
            .bind(&organization_id)
            .bind(&user_id)
            .execute(&state.db)
            .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Organization member not found"));
    }

    tracing::info!(
        "Removed user {} from organization {}",
        user_id,
        organization_id
    );

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn slug_generation_normalizes_names() {
        assert_eq!(generate_slug("Acme Corp"), "acme-corp");
        assert_eq!(generate_slug("  Spaced   Out  "), "spaced-out");
        assert_eq!(generate_slug("Already-Slugged"), "already-slugged");
        assert_eq!(generate_slug("Dots.and.Symbols!"), "dots-and-symbols");
    }

    async fn seed(pool: &db::DbPool) {
        let now = chrono::Utc::now().to_rfc3339();
        for (id, email) in [("u1", "owner@x.y"), ("u2", "member@x.y")] {
            sqlx::query(
                "INSERT INTO users (id, email, name, is_platform_admin, metadata, created_at, updated_at)
                 VALUES (?, ?, '', 0, '{}', ?, ?)",
            )
            .bind(id)
            .bind(email)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await
            .unwrap();
        }
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, is_active, subscription_tier, created_at, updated_at)
             VALUES ('org-1', 'Acme', 'acme', 1, 'free', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
        for (mid, uid, role) in [("m1", "u1", "owner"), ("m2", "u2", "member")] {
            sqlx::query(
                "INSERT INTO organization_members (id, organization_id, user_id, role, created_at)
                 VALUES (?, 'org-1', ?, ?, ?)",
            )
            .bind(mid)
            .bind(uid)
            .bind(role)
            .bind(&now)
            .execute(pool)
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn membership_checks_enforce_the_role_ladder() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        seed(&pool).await;

        assert!(require_org_role(&pool, "org-1", "u1", OrgRole::Owner)
            .await
            .is_ok());
        assert!(require_org_role(&pool, "org-1", "u2", OrgRole::Admin)
            .await
            .is_err());
        assert!(require_org_role(&pool, "org-1", "u2", OrgRole::Member)
            .await
            .is_ok());
        // Not a member at all
        assert!(require_org_role(&pool, "org-1", "u3", OrgRole::Viewer)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn members_are_ordered_by_role() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        seed(&pool).await;

        let members = fetch_members(&pool, "org-1").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].role, "owner");
        assert_eq!(members[1].role, "member");
    }

    #[tokio::test]
    async fn owner_count_guards_the_last_owner() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        seed(&pool).await;

        assert_eq!(count_owners(&pool, "org-1").await.unwrap(), 1);
    }

    async fn test_state() -> Arc<crate::AppState> {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let mut config = crate::config::Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        let backend = Arc::new(crate::auth::backend::SqliteAuthBackend::new(
            pool.clone(),
            config.auth.clone(),
        ));
        Arc::new(crate::AppState::new(config, pool, backend))
    }

    fn acting_as(id: &str, email: &str) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            email: email.to_string(),
            session_id: "session-1".to_string(),
            organization_id: None,
        }
    }

    async fn seed_user_row(pool: &db::DbPool, id: &str, email: &str) {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO users (id, email, name, is_platform_admin, metadata, created_at, updated_at)
             VALUES (?, ?, '', 0, '{}', ?, ?)",
        )
        .bind(id)
        .bind(email)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn creating_an_organization_grants_the_default_apps() {
        let state = test_state().await;
        let user_id = Uuid::new_v4().to_string();
        seed_user_row(&state.db, &user_id, "founder@x.y").await;

        let (status, _) = create_organization(
            State(state.clone()),
            acting_as(&user_id, "founder@x.y"),
            Json(CreateOrganizationRequest {
                name: "Acme".to_string(),
                slug: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let organizations = state.backend.list_user_organizations(&user_id).await.unwrap();
        assert_eq!(organizations.len(), 1);
        let expected: Vec<String> = DEFAULT_APPS.iter().map(|s| s.to_string()).collect();
        assert_eq!(organizations[0].apps, expected);
    }

    // Two users, one organization, both ids real UUIDs so they survive the
    // handlers' path validation
    async fn seed_handler_org(state: &crate::AppState) -> (String, String, String) {
        let now = chrono::Utc::now().to_rfc3339();
        let org_id = Uuid::new_v4().to_string();
        let owner_id = Uuid::new_v4().to_string();
        let member_id = Uuid::new_v4().to_string();
        seed_user_row(&state.db, &owner_id, "owner@x.y").await;
        seed_user_row(&state.db, &member_id, "member@x.y").await;
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, is_active, subscription_tier, created_at, updated_at)
             VALUES (?, 'Acme', 'acme', 1, 'free', ?, ?)",
        )
        .bind(&org_id)
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await
        .unwrap();
        for (uid, role) in [(&owner_id, "owner"), (&member_id, "member")] {
            sqlx::query(
                "INSERT INTO organization_members (id, organization_id, user_id, role, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&org_id)
            .bind(uid)
            .bind(role)
            .bind(&now)
            .execute(&state.db)
            .await
            .unwrap();
        }
        (org_id, owner_id, member_id)
    }

    #[tokio::test]
    async fn the_last_owner_cannot_be_demoted() {
        let state = test_state().await;
        let (org_id, owner_id, _) = seed_handler_org(&state).await;

        let result = update_member_role(
            State(state.clone()),
            Path((org_id.clone(), owner_id.clone())),
            acting_as(&owner_id, "owner@x.y"),
            Json(UpdateMemberRoleRequest {
                role: "member".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(count_owners(&state.db, &org_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn the_last_owner_cannot_be_removed() {
        let state = test_state().await;
        let (org_id, owner_id, member_id) = seed_handler_org(&state).await;

        // Neither by an admin nor by leaving voluntarily
        let result = remove_member(
            State(state.clone()),
            Path((org_id.clone(), owner_id.clone())),
            acting_as(&owner_id, "owner@x.y"),
        )
        .await;
        assert!(result.is_err());

        // Promote a second owner and the removal goes through
        update_member_role(
            State(state.clone()),
            Path((org_id.clone(), member_id.clone())),
            acting_as(&owner_id, "owner@x.y"),
            Json(UpdateMemberRoleRequest {
                role: "owner".to_string(),
            }),
        )
        .await
        .unwrap();

        let status = remove_member(
            State(state.clone()),
            Path((org_id.clone(), owner_id.clone())),
            acting_as(&owner_id, "owner@x.y"),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(count_owners(&state.db, &org_id).await.unwrap(), 1);
    }
}
