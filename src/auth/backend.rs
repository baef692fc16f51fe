//! The RPC surface consumed by the login flow, and its local implementation.
//!
//! The callback orchestration is written against [`AuthBackend`] so the
//! routing rules can be exercised with a mock; [`SqliteAuthBackend`] is the
//! production implementation over the pool.

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::tokens::{generate_token, hash_token, mint_access_token};
use crate::config::AuthConfig;
use crate::db::{
    DbPool, Invitation, InvitationStatus, LoginToken, LoginTokenKind, Organization,
    OrganizationWithAccess, Session, SessionTokens, User, UserMetadata,
};

#[derive(Debug, Error)]
pub enum BackendError {
    /// The presented code or one-time token is invalid, expired, or consumed.
    #[error("{0}")]
    InvalidCredential(String),
    /// The operation was refused by a business rule.
    #[error("{0}")]
    Rejected(String),
    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// A freshly established login: the user, the session row id, and the token
/// pair destined for cookies.
#[derive(Debug, Clone)]
pub struct AuthenticatedLogin {
    pub user: User,
    pub session_id: String,
    pub tokens: SessionTokens,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange a one-time authorization code for a session.
    async fn exchange_code(&self, code: &str) -> Result<AuthenticatedLogin, BackendError>;

    /// Exchange an emailed one-time token (magic link or invite) for a
    /// session. The token kind must match the link type.
    async fn verify_token_hash(
        &self,
        token: &str,
        kind: LoginTokenKind,
    ) -> Result<AuthenticatedLogin, BackendError>;

    /// Finalize a pending invitation: insert the membership row, mark the
    /// invitation accepted, clear the user's invitation metadata. Accepting
    /// an already-accepted invitation is a no-op.
    async fn finalize_invitation(
        &self,
        user_id: &str,
        invitation_id: &str,
    ) -> Result<(), BackendError>;

    /// Active organizations the user belongs to, each with the user's role
    /// and the apps the organization can access.
    async fn list_user_organizations(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrganizationWithAccess>, BackendError>;

    /// Stamp an organization claim into the session and reissue tokens.
    /// The session's user must be a member of the organization.
    async fn switch_organization(
        &self,
        session_id: &str,
        organization_id: &str,
    ) -> Result<SessionTokens, BackendError>;

    /// Rotate the refresh token and reissue an access token carrying the
    /// session's current claims.
    async fn refresh_session(&self, refresh_token: &str)
        -> Result<AuthenticatedLogin, BackendError>;

    /// Revoke the session entirely.
    async fn sign_out(&self, session_id: &str) -> Result<(), BackendError>;
}

pub struct SqliteAuthBackend {
    pool: DbPool,
    auth: AuthConfig,
}

impl SqliteAuthBackend {
    pub fn new(pool: DbPool, auth: AuthConfig) -> Self {
        Self { pool, auth }
    }

    /// Consume a one-time token row exactly once. The guarded UPDATE makes
    /// concurrent exchanges of the same token race safely: exactly one wins.
    async fn consume_login_token(
        &self,
        token: &str,
        expected_kind: Option<LoginTokenKind>,
    ) -> Result<LoginToken, BackendError> {
        let row: Option<LoginToken> =
            sqlx::query_as("SELECT * FROM login_tokens WHERE token_hash = ?")
                .bind(hash_token(token))
                .fetch_optional(&self.pool)
                .await?;

        let row = row.ok_or_else(|| {
            BackendError::InvalidCredential("Invalid login code".to_string())
        })?;

        if let Some(expected) = expected_kind {
            if row.kind != expected.to_string() {
                return Err(BackendError::InvalidCredential(
                    "Login link type mismatch".to_string(),
                ));
            }
        }

        if row.consumed_at.is_some() {
            return Err(BackendError::InvalidCredential(
                "Login code already used".to_string(),
            ));
        }

        let expired = chrono::DateTime::parse_from_rfc3339(&row.expires_at)
            .map(|t| t < chrono::Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(BackendError::InvalidCredential(
                "Login code expired".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE login_tokens SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(&row.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::InvalidCredential(
                "Login code already used".to_string(),
            ));
        }

        Ok(row)
    }

    async fn load_user(&self, user_id: &str) -> Result<User, BackendError> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        user.ok_or_else(|| BackendError::InvalidCredential("Unknown user".to_string()))
    }

    async fn create_session(&self, user: &User) -> Result<(String, SessionTokens), BackendError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let refresh_token = generate_token();
        let now = chrono::Utc::now();
        let expires_at =
            (now + chrono::Duration::days(self.auth.session_ttl_days)).to_rfc3339();

        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_token_hash, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(&user.id)
        .bind(hash_token(&refresh_token))
        .bind(&expires_at)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let access_token = mint_access_token(
            &self.auth.jwt_secret,
            &user.id,
            &user.email,
            &session_id,
            None,
            self.auth.access_token_ttl_secs,
        )?;

        Ok((
            session_id,
            SessionTokens {
                access_token,
                refresh_token,
                expires_at,
            },
        ))
    }

    /// Rotate the session's refresh token and mint an access token from its
    /// current claims.
    async fn reissue_tokens(&self, session: &Session) -> Result<SessionTokens, BackendError> {
        let user = self.load_user(&session.user_id).await?;
        let refresh_token = generate_token();

        sqlx::query("UPDATE sessions SET refresh_token_hash = ? WHERE id = ?")
            .bind(hash_token(&refresh_token))
            .bind(&session.id)
            .execute(&self.pool)
            .await?;

        let access_token = mint_access_token(
            &self.auth.jwt_secret,
            &user.id,
            &user.email,
            &session.id,
            session.active_organization_id.as_deref(),
            self.auth.access_token_ttl_secs,
        )?;

        Ok(SessionTokens {
            access_token,
            refresh_token,
            expires_at: session.expires_at.clone(),
        })
    }

    async fn login_from_token(&self, row: LoginToken) -> Result<AuthenticatedLogin, BackendError> {
        let user = self.load_user(&row.user_id).await?;
        let (session_id, tokens) = self.create_session(&user).await?;
        Ok(AuthenticatedLogin {
            user,
            session_id,
            tokens,
        })
    }
}

#[async_trait]
impl AuthBackend for SqliteAuthBackend {
    async fn exchange_code(&self, code: &str) -> Result<AuthenticatedLogin, BackendError> {
        let row = self.consume_login_token(code, None).await?;
        self.login_from_token(row).await
    }

    async fn verify_token_hash(
        &self,
        token: &str,
        kind: LoginTokenKind,
    ) -> Result<AuthenticatedLogin, BackendError> {
        let row = self.consume_login_token(token, Some(kind)).await?;
        self.login_from_token(row).await
    }

    async fn finalize_invitation(
        &self,
        user_id: &str,
        invitation_id: &str,
    ) -> Result<(), BackendError> {
        let invitation: Option<Invitation> =
            sqlx::query_as("SELECT * FROM invitations WHERE id = ?")
                .bind(invitation_id)
                .fetch_optional(&self.pool)
                .await?;

        let invitation = invitation
            .ok_or_else(|| BackendError::Rejected("Invitation not found".to_string()))?;

        match invitation.status_enum() {
            // Already finalized; a repeated callback must not fail the login
            InvitationStatus::Accepted => return Ok(()),
            InvitationStatus::Canceled => {
                return Err(BackendError::Rejected(
                    "Invitation has been canceled".to_string(),
                ))
            }
            InvitationStatus::Pending => {}
        }

        if invitation.is_expired() {
            return Err(BackendError::Rejected("Invitation has expired".to_string()));
        }

        let now = chrono::Utc::now().to_rfc3339();

        // Duplicate memberships are upserted away at the data layer
        sqlx::query(
            "INSERT INTO organization_members (id, organization_id, user_id, role, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(organization_id, user_id) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&invitation.organization_id)
        .bind(user_id)
        .bind(&invitation.role)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE invitations SET status = 'accepted' WHERE id = ?")
            .bind(invitation_id)
            .execute(&self.pool)
            .await?;

        // Clear the invitation side-channel from the user's metadata
        let user = self.load_user(user_id).await?;
        let mut metadata = user.metadata();
        metadata.invitation_id = None;
        metadata.invited_organization_id = None;
        metadata.invited_role = None;
        metadata.organization_name = None;
        metadata.redirect_app_url = None;
        let metadata_json =
            serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());

        sqlx::query("UPDATE users SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(metadata_json)
            .bind(&now)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_user_organizations(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrganizationWithAccess>, BackendError> {
        let rows: Vec<(String, Organization)> = {
            let memberships: Vec<crate::db::Membership> = sqlx::query_as(
                "SELECT * FROM organization_members WHERE user_id = ? ORDER BY created_at ASC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

            let mut out = Vec::new();
            for membership in memberships {
                let org: Option<Organization> = sqlx::query_as(
                    "SELECT * FROM organizations WHERE id = ? AND is_active = 1",
                )
                .bind(&membership.organization_id)
                .fetch_optional(&self.pool)
                .await?;
                if let Some(org) = org {
                    out.push((membership.role, org));
                }
            }
            out
        };

        let mut results = Vec::new();
        for (role, organization) in rows {
            let apps: Vec<(String,)> =
                sqlx::query_as("SELECT app FROM organization_apps WHERE organization_id = ?")
                    .bind(&organization.id)
                    .fetch_all(&self.pool)
                    .await?;
            results.push(OrganizationWithAccess {
                organization,
                role,
                apps: apps.into_iter().map(|(app,)| app).collect(),
            });
        }

        Ok(results)
    }

    async fn switch_organization(
        &self,
        session_id: &str,
        organization_id: &str,
    ) -> Result<SessionTokens, BackendError> {
        let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        let session = session
            .ok_or_else(|| BackendError::InvalidCredential("Unknown session".to_string()))?;

        if !session.is_usable() {
            return Err(BackendError::InvalidCredential(
                "Session is no longer valid".to_string(),
            ));
        }

        let membership: Option<(String,)> = sqlx::query_as(
            "SELECT role FROM organization_members WHERE organization_id = ? AND user_id = ?",
        )
        .bind(organization_id)
        .bind(&session.user_id)
        .fetch_optional(&self.pool)
        .await?;
        if membership.is_none() {
            return Err(BackendError::Rejected(
                "User is not a member of this organization".to_string(),
            ));
        }

        sqlx::query("UPDATE sessions SET active_organization_id = ? WHERE id = ?")
            .bind(organization_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        let mut session = session;
        session.active_organization_id = Some(organization_id.to_string());
        self.reissue_tokens(&session).await
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> Result<AuthenticatedLogin, BackendError> {
        let session: Option<Session> =
            sqlx::query_as("SELECT * FROM sessions WHERE refresh_token_hash = ?")
                .bind(hash_token(refresh_token))
                .fetch_optional(&self.pool)
                .await?;
        let session = session
            .ok_or_else(|| BackendError::InvalidCredential("Unknown session".to_string()))?;

        if !session.is_usable() {
            return Err(BackendError::InvalidCredential(
                "Session is no longer valid".to_string(),
            ));
        }

        let user = self.load_user(&session.user_id).await?;
        let tokens = self.reissue_tokens(&session).await?;
        Ok(AuthenticatedLogin {
            user,
            session_id: session.id,
            tokens,
        })
    }

    async fn sign_out(&self, session_id: &str) -> Result<(), BackendError> {
        sqlx::query("UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Fold the invitation context into the invitee's existing metadata bag.
/// Fields stashed earlier (a `redirect_app_url` from a prior magic-link
/// request, say) survive unless the invitation carries its own value.
pub fn merge_invitation_metadata(
    mut metadata: UserMetadata,
    invitation: &Invitation,
    organization_name: &str,
    redirect_app_url: Option<String>,
) -> UserMetadata {
    metadata.invitation_id = Some(invitation.id.clone());
    metadata.invited_organization_id = Some(invitation.organization_id.clone());
    metadata.invited_role = Some(invitation.role.clone());
    metadata.organization_name = Some(organization_name.to_string());
    if redirect_app_url.is_some() {
        metadata.redirect_app_url = redirect_app_url;
    }
    metadata
}
