//! Session and one-time login token models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token_hash: String,
    /// Organization claim stamped by switch-organization; None until an
    /// organization is selected.
    pub active_organization_id: Option<String>,
    pub expires_at: String,
    pub revoked_at: Option<String>,
    pub created_at: String,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expires) => expires < chrono::Utc::now(),
            Err(_) => true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.revoked_at.is_none() && !self.is_expired()
    }
}

/// Token pair handed to the browser via cookies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    /// Short-lived JWT carrying the claims
    pub access_token: String,
    /// Opaque token; its hash identifies the session row
    pub refresh_token: String,
    pub expires_at: String,
}

/// One-time credential backing a magic-link or invite email.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoginToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub kind: String,
    pub expires_at: String,
    pub consumed_at: Option<String>,
    pub created_at: String,
}

/// What kind of one-time credential a callback presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginTokenKind {
    Magiclink,
    Invite,
}

impl std::fmt::Display for LoginTokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginTokenKind::Magiclink => write!(f, "magiclink"),
            LoginTokenKind::Invite => write!(f, "invite"),
        }
    }
}

impl std::str::FromStr for LoginTokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "magiclink" => Ok(LoginTokenKind::Magiclink),
            "invite" => Ok(LoginTokenKind::Invite),
            _ => Err(format!("Unknown login token kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: &str, revoked_at: Option<&str>) -> Session {
        Session {
            id: "s1".into(),
            user_id: "u1".into(),
            refresh_token_hash: "h".into(),
            active_organization_id: None,
            expires_at: expires_at.into(),
            revoked_at: revoked_at.map(String::from),
            created_at: String::new(),
        }
    }

    #[test]
    fn future_session_is_usable() {
        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        assert!(session(&future, None).is_usable());
    }

    #[test]
    fn revoked_or_expired_session_is_not_usable() {
        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let past = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        assert!(!session(&future, Some("now")).is_usable());
        assert!(!session(&past, None).is_usable());
    }

    #[test]
    fn garbage_expiry_counts_as_expired() {
        assert!(session("not-a-date", None).is_expired());
    }
}
