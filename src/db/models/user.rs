//! User identity models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub is_platform_admin: bool,
    /// JSON bag; carries transient invitation fields between the invite email
    /// and acceptance (see [`UserMetadata`]).
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Parse the metadata bag. Malformed JSON degrades to the empty bag
    /// rather than failing a login.
    pub fn metadata(&self) -> UserMetadata {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}

/// Transient fields stuffed into user metadata at invite time and cleared
/// after acceptance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    /// Application origin the user should land on after accepting, when the
    /// invite came from a different app than this deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_app_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub is_platform_admin: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            is_platform_admin: user.is_platform_admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_parses_invitation_fields() {
        let user = User {
            id: "u1".into(),
            email: "a@b.c".into(),
            name: String::new(),
            is_platform_admin: false,
            metadata: r#"{"invitation_id":"inv-1","redirect_app_url":"https://other.app"}"#.into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let meta = user.metadata();
        assert_eq!(meta.invitation_id.as_deref(), Some("inv-1"));
        assert_eq!(meta.redirect_app_url.as_deref(), Some("https://other.app"));
        assert!(meta.invited_role.is_none());
    }

    #[test]
    fn malformed_metadata_degrades_to_empty() {
        let user = User {
            id: "u1".into(),
            email: "a@b.c".into(),
            name: String::new(),
            is_platform_admin: false,
            metadata: "not json".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(user.metadata().invitation_id.is_none());
    }
}
