use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redirects: RedirectConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub processors: ProcessorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Public origin used when building callback links for emails and when
    /// deciding whether a post-login redirect is cross-origin.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,
    /// Session (refresh token) lifetime in days
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    /// Magic-link token lifetime in minutes
    #[serde(default = "default_magic_link_ttl")]
    pub magic_link_ttl_minutes: i64,
    /// Invitation lifetime in days
    #[serde(default = "default_invitation_ttl_days")]
    pub invitation_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_token_ttl_secs: default_access_token_ttl(),
            session_ttl_days: default_session_ttl_days(),
            magic_link_ttl_minutes: default_magic_link_ttl(),
            invitation_ttl_days: default_invitation_ttl_days(),
        }
    }
}

fn default_jwt_secret() -> String {
    // Random secret when not provided; sessions won't survive restarts
    uuid::Uuid::new_v4().to_string()
}

fn default_access_token_ttl() -> i64 {
    900
}

fn default_session_ttl_days() -> i64 {
    7
}

fn default_magic_link_ttl() -> i64 {
    15
}

fn default_invitation_ttl_days() -> i64 {
    7
}

/// Post-login redirect path set, overridable per deploying application.
#[derive(Debug, Clone, Deserialize)]
pub struct RedirectConfig {
    #[serde(default = "default_success_path")]
    pub success: String,
    #[serde(default = "default_no_organization_path")]
    pub no_organization: String,
    #[serde(default = "default_organization_picker_path")]
    pub organization_picker: String,
    #[serde(default = "default_error_base_path")]
    pub error_base: String,
    #[serde(default = "default_login_path")]
    pub login: String,
    #[serde(default = "default_unauthorized_path")]
    pub unauthorized: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            success: default_success_path(),
            no_organization: default_no_organization_path(),
            organization_picker: default_organization_picker_path(),
            error_base: default_error_base_path(),
            login: default_login_path(),
            unauthorized: default_unauthorized_path(),
        }
    }
}

fn default_success_path() -> String {
    "/".to_string()
}

fn default_no_organization_path() -> String {
    "/auth/no-organization".to_string()
}

fn default_organization_picker_path() -> String {
    "/login?select-org=true".to_string()
}

fn default_error_base_path() -> String {
    "/auth/error".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_unauthorized_path() -> String {
    "/unauthorized".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "Vestibule".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProcessorConfig {
    /// URL of the external execution function that runs LLM operations
    pub execution_url: Option<String>,
    /// Bearer token presented to the execution function
    pub service_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_redirect_path() {
        let config = Config::default();
        assert_eq!(config.redirects.success, "/");
        assert_eq!(config.redirects.error_base, "/auth/error");
        assert_eq!(config.redirects.organization_picker, "/login?select-org=true");
        assert_eq!(config.redirects.no_organization, "/auth/no-organization");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [redirects]
            success = "/dashboard"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.redirects.success, "/dashboard");
        assert_eq!(config.redirects.error_base, "/auth/error");
        assert_eq!(config.auth.session_ttl_days, 7);
    }
}
