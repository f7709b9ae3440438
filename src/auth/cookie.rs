//! The refresh-token cookie.
//!
//! `HttpOnly`, `SameSite=Strict`, `Secure` unless disabled for plain-HTTP
//! development, and scoped to the auth routes so it only travels with refresh
//! and logout calls (login sets it from the same path).

use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::HttpRequest;

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Every route that reads or writes the cookie lives under this path.
pub const REFRESH_COOKIE_PATH: &str = "/api-v1/auth";

#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub secure: bool,
    pub max_age_secs: i64,
}

impl CookieSettings {
    pub fn refresh_cookie(&self, token: &str) -> Cookie<'static> {
        self.base(token.to_string())
            .max_age(time::Duration::seconds(self.max_age_secs))
            .finish()
    }

    /// An empty, already-expired cookie that makes the browser drop the refresh token.
    pub fn clear_refresh_cookie(&self) -> Cookie<'static> {
        self.base(String::new())
            .max_age(time::Duration::ZERO)
            .finish()
    }

    fn base(&self, value: String) -> actix_web::cookie::CookieBuilder<'static> {
        Cookie::build(REFRESH_COOKIE_NAME, value)
            .path(REFRESH_COOKIE_PATH)
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
    }
}

pub fn refresh_token_from(req: &HttpRequest) -> Option<String> {
    req.cookie(REFRESH_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}
