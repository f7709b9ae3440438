//! Session middleware for protected scopes.
//!
//! Verifies the `Authorization: Bearer <access token>` header and stores the
//! subject as [`AuthenticatedUserId`] in the request extensions. It never
//! refreshes: a rejected request gets a 401 and the client decides whether to
//! refresh and retry.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    web, Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};

use crate::auth::extractors::AuthenticatedUserId;
use crate::auth::token::TokenKind;
use crate::error::AppError;
use crate::state::AppState;

pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService { service }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match authenticate(&req) {
            Ok(user_id) => {
                req.extensions_mut().insert(user_id);
                Box::pin(self.service.call(req))
            }
            Err(app_err) => Box::pin(async move { Err(app_err.into()) }),
        }
    }
}

/// Every failure maps to the same `AppError::Unauthorized` response; the reason
/// only reaches the log.
fn authenticate(req: &ServiceRequest) -> Result<AuthenticatedUserId, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::InternalServerError("AppState is not configured".into()))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        log::debug!("rejecting {}: missing bearer token", req.path());
        return Err(AppError::Unauthorized("Missing token".into()));
    };

    match state.tokens.verify(token, TokenKind::Access) {
        Ok(verified) => Ok(AuthenticatedUserId(verified.user_id)),
        Err(err) if err.is_expired() => {
            log::debug!("rejecting {}: access token expired", req.path());
            Err(err.into())
        }
        Err(err) => {
            log::warn!("rejecting {}: {}", req.path(), err);
            Err(err.into())
        }
    }
}
