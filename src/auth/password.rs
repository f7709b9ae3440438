use crate::error::AppError;
use bcrypt::{hash, verify};

/// Cheapest cost bcrypt accepts. `Config::for_tests` uses it to keep tests fast.
pub const MIN_BCRYPT_COST: u32 = 4;

/// `cost` comes from configuration (`BCRYPT_COST`, default `bcrypt::DEFAULT_COST`).
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost)
        .map_err(|e| AppError::InternalServerError(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, hashed_password: &str) -> Result<bool, AppError> {
    verify(password, hashed_password)
        .map_err(|e| AppError::InternalServerError(format!("Failed to verify password: {}", e)))
}
