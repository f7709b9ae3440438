//! Persistence of user records.
//!
//! The auth core only talks to [`UserStore`]. Two implementations ship with the
//! crate: [`MemoryUserStore`] for tests and single-process runs, and
//! [`PgUserStore`] backed by PostgreSQL through `sqlx`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewUser, User};

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("user not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lookups by email are case-insensitive; implementations store the
/// normalized form (see [`crate::models::normalize_email`]).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn mark_email_verified(&self, id: Uuid) -> Result<(), StoreError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
}
