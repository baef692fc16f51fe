//! Input validation for API requests.
//!
//! Validators return `Err(String)` with a user-facing message; handlers wrap
//! them into field-level `ApiError`s, collecting several with the
//! `ValidationErrorBuilder` from the `error` module where a request carries
//! multiple fields.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email shape check. Deliverability is the mailer's problem;
    /// this only rejects obviously malformed addresses.
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Regex for organization slugs (lowercase alphanumeric with dashes)
    static ref SLUG_REGEX: Regex = Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap();

    /// Regex for absolute HTTP(S) URLs carried in redirect fields
    static ref HTTP_URL_REGEX: Regex = Regex::new(
        r"^https?://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)*(:\d+)?(/[-a-zA-Z0-9_%&?=+@~./]*)?$"
    )
    .unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }

    Ok(())
}

/// Validate an organization name
pub fn validate_org_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Organization name is required".to_string());
    }

    if trimmed.len() > 100 {
        return Err("Organization name is too long (max 100 characters)".to_string());
    }

    Ok(())
}

/// Validate an organization slug
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("Slug is required".to_string());
    }

    if slug.len() > 63 {
        return Err("Slug is too long (max 63 characters)".to_string());
    }

    if slug.len() < 2 {
        return Err("Slug is too short (min 2 characters)".to_string());
    }

    if !SLUG_REGEX.is_match(slug) {
        return Err(
            "Slug must be lowercase alphanumeric with dashes, starting and ending with alphanumeric"
                .to_string(),
        );
    }

    Ok(())
}

/// Validate a redirect application URL (optional field)
pub fn validate_redirect_url(url: &Option<String>) -> Result<(), String> {
    if let Some(u) = url {
        if u.is_empty() {
            return Ok(()); // Empty string treated as no redirect
        }

        if u.len() > 2048 {
            return Err("Redirect URL is too long (max 2048 characters)".to_string());
        }

        if !HTTP_URL_REGEX.is_match(u) {
            return Err("Redirect URL must be an absolute HTTP(S) URL".to_string());
        }
    }

    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Valid member roles, in descending order of privilege
const VALID_ROLES: [&str; 4] = ["owner", "admin", "member", "viewer"];

/// Validate a member role value
pub fn validate_role(role: &str) -> Result<(), String> {
    let role_lower = role.to_lowercase();
    if !VALID_ROLES.contains(&role_lower.as_str()) {
        return Err(format!(
            "Invalid role. Must be one of: {}",
            VALID_ROLES.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("first.last+tag@sub.example.co").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("user@nodot").is_err());
        assert!(validate_email("spaces in@example.com").is_err());
    }

    #[test]
    fn test_validate_org_name() {
        assert!(validate_org_name("Acme Corp").is_ok());
        assert!(validate_org_name("x").is_ok());

        assert!(validate_org_name("").is_err());
        assert!(validate_org_name("   ").is_err());
        assert!(validate_org_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("acme-corp-2").is_ok());

        assert!(validate_slug("").is_err());
        assert!(validate_slug("a").is_err()); // too short
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("trailing-").is_err());
        assert!(validate_slug("Uppercase").is_err());
        assert!(validate_slug("under_score").is_err());
    }

    #[test]
    fn test_validate_redirect_url() {
        assert!(validate_redirect_url(&Some("https://app.example.com".to_string())).is_ok());
        assert!(validate_redirect_url(&Some("http://localhost:3000/start".to_string())).is_ok());
        assert!(validate_redirect_url(&None).is_ok());
        assert!(validate_redirect_url(&Some(String::new())).is_ok());

        assert!(validate_redirect_url(&Some("ftp://example.com".to_string())).is_err());
        assert!(validate_redirect_url(&Some("javascript:alert(1)".to_string())).is_err());
        assert!(validate_redirect_url(&Some("/relative/path".to_string())).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "organization_id").is_ok());
        assert!(validate_uuid("", "organization_id").is_err());
        assert!(validate_uuid("not-a-uuid", "organization_id").is_err());
    }

    #[test]
    fn test_validate_role() {
        assert!(validate_role("owner").is_ok());
        assert!(validate_role("admin").is_ok());
        assert!(validate_role("member").is_ok());
        assert!(validate_role("viewer").is_ok());
        // Case insensitive
        assert!(validate_role("Admin").is_ok());

        assert!(validate_role("").is_err());
        assert!(validate_role("superuser").is_err());
    }
}
