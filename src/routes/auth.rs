use crate::{
    auth::{
        cookie::refresh_token_from, hash_password, verify_password, EmailRequest, LoginRequest,
        LoginResponse, MessageResponse, RefreshResponse, RegisterRequest, ResetPasswordRequest,
        TokenKind, VerifyEmailRequest,
    },
    error::{AppError, UNAUTHORIZED_MESSAGE},
    models::{NewUser, UserProfile},
    state::AppState,
};
use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use serde_json::json;
use validator::Validate;

/// Register a new user
///
/// Creates the account (unverified) and mails an email verification link.
/// Returns the new user's profile; no session is started.
#[post("/register")]
pub async fn register(
    state: web::Data<AppState>,
    register_data: web::Json<RegisterRequest>,
) -> Result<impl Responder, AppError> {
    register_data.validate()?;
    let register_data = register_data.into_inner();

    let password_hash = hash_password(&register_data.password, state.bcrypt_cost)?;
    let user = state
        .users
        .insert(NewUser {
            name: register_data.name.trim().to_string(),
            email: register_data.email,
            password_hash,
        })
        .await?;

    let verification = state.tokens.issue(user.id, TokenKind::EmailVerification)?;
    state
        .mailer
        .send_verification(&user.email, &verification.token)
        .await;

    log::info!("registered user {}", user.id);
    Ok(HttpResponse::Created().json(UserProfile::from(&user)))
}

/// Login user
///
/// Answers `{accessToken, user}` and sets the refresh cookie.
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    login_data: web::Json<LoginRequest>,
) -> Result<impl Responder, AppError> {
    login_data.validate()?;

    let user = state
        .users
        .find_by_email(&login_data.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown email".into()))?;

    if !verify_password(&login_data.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    if state.require_email_verification && !user.is_email_verified {
        return Err(AppError::Forbidden(
            "Email not verified. Please check your inbox".into(),
        ));
    }

    let access = state.tokens.issue_access_token(user.id)?;
    let refresh_token = state.tokens.issue_refresh_token(user.id)?;

    log::info!("user {} logged in", user.id);
    Ok(HttpResponse::Ok()
        .cookie(state.cookies.refresh_cookie(&refresh_token.token))
        .json(LoginResponse {
            access_token: access.token,
            user: UserProfile::from(&user),
        }))
}

/// Exchange the refresh cookie for a new access token
///
/// A valid, unexpired refresh token is all that is needed. When rotation is
/// enabled the cookie is replaced, restarting its expiry window. A missing or
/// invalid cookie answers 401 and clears the cookie.
#[post("/refresh")]
pub async fn refresh(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let Some(token) = refresh_token_from(&req) else {
        log::debug!("refresh rejected: no refresh cookie");
        return Ok(refresh_rejected(&state));
    };

    let verified = match state.tokens.verify(&token, TokenKind::Refresh) {
        Ok(verified) => verified,
        Err(err) => {
            if err.is_expired() {
                log::debug!("refresh rejected: refresh token expired");
            } else {
                log::warn!("refresh rejected: {}", err);
            }
            return Ok(refresh_rejected(&state));
        }
    };

    let access = state.tokens.issue_access_token(verified.user_id)?;

    let mut response = HttpResponse::Ok();
    if state.rotate_refresh_tokens {
        let rotated = state.tokens.issue_refresh_token(verified.user_id)?;
        response.cookie(state.cookies.refresh_cookie(&rotated.token));
    }

    log::debug!("issued access token for user {}", verified.user_id);
    Ok(response.json(RefreshResponse {
        access_token: access.token,
    }))
}

fn refresh_rejected(state: &AppState) -> HttpResponse {
    HttpResponse::Unauthorized()
        .cookie(state.cookies.clear_refresh_cookie())
        .json(json!({ "error": UNAUTHORIZED_MESSAGE }))
}

/// Logout user
///
/// Clears the refresh cookie. Succeeds whether or not a session existed.
#[post("/logout")]
pub async fn logout(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok()
        .cookie(state.cookies.clear_refresh_cookie())
        .json(MessageResponse::new("Logged out successfully"))
}

#[post("/verify-email")]
pub async fn verify_email(
    state: web::Data<AppState>,
    verify_data: web::Json<VerifyEmailRequest>,
) -> Result<impl Responder, AppError> {
    verify_data.validate()?;

    let verified = state
        .tokens
        .verify(&verify_data.token, TokenKind::EmailVerification)?;
    state.users.mark_email_verified(verified.user_id).await?;

    log::info!("user {} verified their email", verified.user_id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Email verified successfully")))
}

/// Request a password reset link
///
/// The answer is the same whether or not the account exists.
#[post("/reset-password-request")]
pub async fn reset_password_request(
    state: web::Data<AppState>,
    email_data: web::Json<EmailRequest>,
) -> Result<impl Responder, AppError> {
    email_data.validate()?;

    if let Some(user) = state.users.find_by_email(&email_data.email).await? {
        let reset = state.tokens.issue(user.id, TokenKind::PasswordReset)?;
        state
            .mailer
            .send_password_reset(&user.email, &reset.token)
            .await;
    } else {
        log::debug!("password reset requested for unknown email");
    }

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "If an account exists for that email, a reset link has been sent",
    )))
}

#[post("/reset-password")]
pub async fn reset_password(
    state: web::Data<AppState>,
    reset_data: web::Json<ResetPasswordRequest>,
) -> Result<impl Responder, AppError> {
    reset_data.validate()?;

    let verified = state
        .tokens
        .verify(&reset_data.token, TokenKind::PasswordReset)?;
    let password_hash = hash_password(&reset_data.new_password, state.bcrypt_cost)?;
    state
        .users
        .update_password(verified.user_id, &password_hash)
        .await?;

    log::info!("user {} reset their password", verified.user_id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Password reset successfully")))
}
