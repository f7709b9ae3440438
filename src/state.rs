//! Shared server state handed to every handler through `web::Data`.

use std::sync::Arc;

use chrono::Duration;

use crate::auth::{CookieSettings, TokenIssuer};
use crate::config::Config;
use crate::mail::{LogMailer, Mailer};
use crate::store::{MemoryUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
    pub tokens: TokenIssuer,
    pub cookies: CookieSettings,
    pub rotate_refresh_tokens: bool,
    pub require_email_verification: bool,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(config: &Config, users: Arc<dyn UserStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            users,
            mailer,
            tokens: TokenIssuer::new(
                config.jwt_secret.as_bytes(),
                Duration::seconds(config.access_token_ttl_secs),
                Duration::seconds(config.refresh_token_ttl_secs),
            ),
            cookies: CookieSettings {
                secure: config.secure_cookies,
                max_age_secs: config.refresh_token_ttl_secs,
            },
            rotate_refresh_tokens: config.rotate_refresh_tokens,
            require_email_verification: config.require_email_verification,
            bcrypt_cost: config.bcrypt_cost,
        }
    }

    /// In-memory store and log-only mailer.
    pub fn in_memory(config: &Config) -> Self {
        let frontend = config
            .frontend_url
            .clone()
            .unwrap_or_else(|| config.server_url());
        Self::new(
            config,
            Arc::new(MemoryUserStore::new()),
            Arc::new(LogMailer::new(frontend)),
        )
    }
}
