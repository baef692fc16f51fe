//! Opaque token generation and access-token (JWT) claims.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Generate a random opaque token
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage; only hashes are persisted
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Claims embedded in the short-lived access token. `org` is the active
/// organization claim stamped by switch-organization; downstream
/// authorization consults it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mint an access token for a session.
pub fn mint_access_token(
    secret: &str,
    user_id: &str,
    email: &str,
    session_id: &str,
    org: Option<&str>,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        org: org.map(String::from),
        sid: session_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify an access token and return its claims.
pub fn verify_access_token(
    secret: &str,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_tokens_are_unique_and_hashed_stably() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), hash_token(&b));
        // sha256 hex
        assert_eq!(hash_token(&a).len(), 64);
    }

    #[test]
    fn access_token_round_trips_claims() {
        let token =
            mint_access_token("secret", "u1", "a@b.c", "s1", Some("org-1"), 600).unwrap();
        let claims = verify_access_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email, "a@b.c");
        assert_eq!(claims.org.as_deref(), Some("org-1"));
        assert_eq!(claims.sid, "s1");
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let token = mint_access_token("secret", "u1", "a@b.c", "s1", None, -600).unwrap();
        assert!(verify_access_token("secret", &token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint_access_token("secret", "u1", "a@b.c", "s1", None, 600).unwrap();
        assert!(verify_access_token("other", &token).is_err());
    }
}
