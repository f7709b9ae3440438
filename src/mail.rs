//! Delivery of email verification and password reset links.

use async_trait::async_trait;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str);

    async fn send_password_reset(&self, email: &str, token: &str);
}

/// Writes the links to the log instead of sending mail. Used when no mail
/// transport is configured.
pub struct LogMailer {
    frontend_url: String,
}

impl LogMailer {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Self {
            frontend_url: frontend_url.into(),
        }
    }

    fn link(&self, route: &str, token: &str) -> String {
        format!(
            "{}/{}?token={}",
            self.frontend_url.trim_end_matches('/'),
            route,
            token
        )
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, token: &str) {
        log::info!(
            "verification link for {}: {}",
            email,
            self.link("verify-email", token)
        );
    }

    async fn send_password_reset(&self, email: &str, token: &str) {
        log::info!(
            "password reset link for {}: {}",
            email,
            self.link("reset-password", token)
        );
    }
}
