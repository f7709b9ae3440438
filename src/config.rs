//! Environment-driven server configuration.
//!
//! Values are read from the process environment. `main` loads a `.env` file
//! through `dotenv` before calling [`Config::from_env`], so either source works.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while building a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. `None` selects the in-memory user store.
    pub database_url: Option<String>,
    pub server_port: u16,
    pub server_host: String,
    /// Origin allowed to call the API with credentials (the SPA).
    pub frontend_url: Option<String>,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    /// Adds the `Secure` attribute to the refresh cookie.
    pub secure_cookies: bool,
    /// Replace the refresh cookie on every successful refresh.
    pub rotate_refresh_tokens: bool,
    /// Refuse logins until the account's email address is verified.
    pub require_email_verification: bool,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            server_port: parse_var("SERVER_PORT", 5000)?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            frontend_url: env::var("FRONTEND_URL").ok().filter(|url| !url.is_empty()),
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            access_token_ttl_secs: parse_var("ACCESS_TOKEN_TTL_SECS", 15 * 60)?,
            refresh_token_ttl_secs: parse_var("REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60)?,
            secure_cookies: parse_var("SECURE_COOKIES", true)?,
            rotate_refresh_tokens: parse_var("ROTATE_REFRESH_TOKENS", true)?,
            require_email_verification: parse_var("REQUIRE_EMAIL_VERIFICATION", true)?,
            bcrypt_cost: parse_var("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
        })
    }

    /// Configuration suited to tests: in-memory store, plain-HTTP cookies and
    /// the cheapest bcrypt cost.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: None,
            server_port: 0,
            server_host: "127.0.0.1".to_string(),
            frontend_url: None,
            jwt_secret: jwt_secret.to_string(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            secure_cookies: false,
            rotate_refresh_tokens: true,
            require_email_verification: false,
            bcrypt_cost: crate::auth::password::MIN_BCRYPT_COST,
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
