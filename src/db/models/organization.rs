//! Organization and membership models with role-based access control.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Organization roles with hierarchical permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    /// Full access, can delete the organization, manage all members
    Owner,
    /// Manage members (except owners), invitations, processors
    Admin,
    /// Create/edit processors, execute runs
    Member,
    /// Read-only access
    Viewer,
}

impl OrgRole {
    /// Check if this role has at least the specified permission level
    pub fn has_at_least(&self, required: OrgRole) -> bool {
        self.level() >= required.level()
    }

    /// Get the permission level (higher = more permissions)
    pub fn level(&self) -> u8 {
        match self {
            OrgRole::Owner => 4,
            OrgRole::Admin => 3,
            OrgRole::Member => 2,
            OrgRole::Viewer => 1,
        }
    }

    /// Check if the role can manage members holding the given role
    pub fn can_manage_member_role(&self, target_role: OrgRole) -> bool {
        match self {
            OrgRole::Owner => true,
            OrgRole::Admin => !matches!(target_role, OrgRole::Owner),
            _ => false,
        }
    }

    pub fn can_manage_members(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin)
    }

    pub fn can_manage_processors(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin | OrgRole::Member)
    }

    pub fn can_delete_organization(&self) -> bool {
        matches!(self, OrgRole::Owner)
    }
}

impl std::fmt::Display for OrgRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrgRole::Owner => write!(f, "owner"),
            OrgRole::Admin => write!(f, "admin"),
            OrgRole::Member => write!(f, "member"),
            OrgRole::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(OrgRole::Owner),
            "admin" => Ok(OrgRole::Admin),
            "member" => Ok(OrgRole::Member),
            "viewer" => Ok(OrgRole::Viewer),
            _ => Err(format!("Unknown organization role: {}", s)),
        }
    }
}

impl From<String> for OrgRole {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(OrgRole::Viewer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub subscription_tier: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership row linking a user to an organization with a role
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub role: String,
    pub created_at: String,
}

impl Membership {
    pub fn role_enum(&self) -> OrgRole {
        OrgRole::from(self.role.clone())
    }
}

/// Membership with user details for member listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipWithUser {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub role: String,
    pub created_at: String,
    pub user_name: String,
    pub user_email: String,
}

/// An organization as seen from one user's membership: the org, the user's
/// role in it, and the platform apps the organization can access. This is
/// the row shape the organization count router consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationWithAccess {
    pub organization: Organization,
    pub role: String,
    pub apps: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    /// Optional slug (auto-generated from name if not provided)
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectOrganizationRequest {
    pub organization_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ladder_is_ordered() {
        assert!(OrgRole::Owner.has_at_least(OrgRole::Admin));
        assert!(OrgRole::Admin.has_at_least(OrgRole::Member));
        assert!(OrgRole::Member.has_at_least(OrgRole::Viewer));
        assert!(!OrgRole::Viewer.has_at_least(OrgRole::Member));
        assert!(!OrgRole::Admin.has_at_least(OrgRole::Owner));
    }

    #[test]
    fn admins_cannot_manage_owners() {
        assert!(OrgRole::Owner.can_manage_member_role(OrgRole::Owner));
        assert!(!OrgRole::Admin.can_manage_member_role(OrgRole::Owner));
        assert!(OrgRole::Admin.can_manage_member_role(OrgRole::Member));
        assert!(!OrgRole::Member.can_manage_member_role(OrgRole::Viewer));
    }

    #[test]
    fn unknown_role_string_degrades_to_viewer() {
        assert_eq!(OrgRole::from("manager".to_string()), OrgRole::Viewer);
    }
}
