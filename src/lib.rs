pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod notifications;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::auth::backend::AuthBackend;
use crate::notifications::SystemEmailService;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub backend: Arc<dyn AuthBackend>,
    pub mailer: SystemEmailService,
    /// Shared client for calls to the external execution function
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, backend: Arc<dyn AuthBackend>) -> Self {
        let mailer = SystemEmailService::new(config.email.clone());
        Self {
            config,
            db,
            backend,
            mailer,
            http: reqwest::Client::new(),
        }
    }
}
