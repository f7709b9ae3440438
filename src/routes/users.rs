use crate::{
    auth::AuthenticatedUserId, error::AppError, models::UserProfile, state::AppState,
};
use actix_web::{get, web, HttpResponse, Responder};

/// Profile of the authenticated user.
///
/// ## Responses:
/// - `200 OK`: the `UserProfile` of the token subject.
/// - `401 Unauthorized`: missing/invalid access token, or the user no longer exists.
#[get("/me")]
pub async fn me(
    state: web::Data<AppState>,
    user_id: AuthenticatedUserId,
) -> Result<impl Responder, AppError> {
    let user = state
        .users
        .find_by_id(user_id.0)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;

    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}
