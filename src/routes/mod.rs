pub mod auth;
pub mod health;
pub mod users;

use actix_web::web;

use crate::auth::AuthMiddleware;
use crate::error::json_error_handler;

/// Prefix shared by every API route.
pub const API_PREFIX: &str = "/api-v1";

/// API routes, relative to [`API_PREFIX`].
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(auth::register)
            .service(auth::login)
            .service(auth::refresh)
            .service(auth::logout)
            .service(auth::verify_email)
            .service(auth::reset_password_request)
            .service(auth::reset_password),
    )
    .service(web::scope("/users").wrap(AuthMiddleware).service(users::me));
}

/// Everything the server exposes: welcome and health endpoints, the API under
/// [`API_PREFIX`], JSON error handling and the 404 fallback. `AppState` must be
/// registered on the `App` separately.
pub fn app(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(health::welcome)
        .service(health::health)
        .service(web::scope(API_PREFIX).configure(config))
        .default_service(web::to(health::not_found));
}
