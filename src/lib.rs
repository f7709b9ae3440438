#![doc = "The `taskhub` library crate."]
#![doc = ""]
#![doc = "Authentication and session core of TaskHub. The server half issues and verifies"]
#![doc = "access/refresh tokens and exposes the `/auth` routes; the client half (`client`)"]
#![doc = "keeps the access token in memory, refreshes it transparently on 401 and tracks"]
#![doc = "the signed-in user. The binary (`main.rs`) wires the server half into actix-web."]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod mail;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;

pub use crate::error::AppError;
pub use crate::state::AppState;
