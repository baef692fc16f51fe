//! Organization invitation models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Canceled,
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "canceled" => Ok(InvitationStatus::Canceled),
            _ => Err(format!("Unknown invitation status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invitation {
    pub id: String,
    pub organization_id: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub invited_at: String,
    pub expires_at: String,
    pub created_by: String,
    pub created_at: String,
}

impl Invitation {
    pub fn is_expired(&self) -> bool {
        if let Ok(expires) = chrono::DateTime::parse_from_rfc3339(&self.expires_at) {
            expires < chrono::Utc::now()
        } else {
            true // Treat parse errors as expired
        }
    }

    pub fn status_enum(&self) -> InvitationStatus {
        self.status
            .parse()
            .unwrap_or(InvitationStatus::Canceled)
    }
}

/// Invitation response enriched for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationResponse {
    pub id: String,
    pub organization_id: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub invited_at: String,
    pub expires_at: String,
    pub created_by: String,
    /// Organization name (for display purposes)
    pub organization_name: Option<String>,
}

impl From<Invitation> for InvitationResponse {
    fn from(inv: Invitation) -> Self {
        Self {
            id: inv.id,
            organization_id: inv.organization_id,
            email: inv.email,
            role: inv.role,
            status: inv.status,
            invited_at: inv.invited_at,
            expires_at: inv.expires_at,
            created_by: inv.created_by,
            organization_name: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    /// Email address to invite
    pub email: String,
    /// Role to assign (owner, admin, member, viewer)
    pub role: String,
    /// Application origin the invitee should land on after accepting
    #[serde(default)]
    pub redirect_app_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(expires_at: &str, status: &str) -> Invitation {
        Invitation {
            id: "inv-1".into(),
            organization_id: "org-1".into(),
            email: "a@b.c".into(),
            role: "member".into(),
            status: status.into(),
            invited_at: String::new(),
            expires_at: expires_at.into(),
            created_by: "u1".into(),
            created_at: String::new(),
        }
    }

    #[test]
    fn expiry_window_is_honored() {
        let future = (chrono::Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        let past = (chrono::Utc::now() - chrono::Duration::days(1)).to_rfc3339();
        assert!(!invitation(&future, "pending").is_expired());
        assert!(invitation(&past, "pending").is_expired());
        assert!(invitation("garbage", "pending").is_expired());
    }

    #[test]
    fn status_round_trips() {
        assert_eq!(
            invitation("x", "pending").status_enum(),
            InvitationStatus::Pending
        );
        assert_eq!(
            invitation("x", "accepted").status_enum(),
            InvitationStatus::Accepted
        );
    }
}
