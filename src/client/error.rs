use reqwest::StatusCode;
use thiserror::Error;

/// Why a refresh did not produce a token. `Clone` so that a single outcome can
/// be handed to every request queued behind the refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh rejected with status {0}")]
    Rejected(u16),
    #[error("network error during refresh: {0}")]
    Network(String),
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    /// The refresh was cancelled (logout, or the refreshing task was dropped).
    #[error("refresh abandoned")]
    Abandoned,
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server still answered 401 after the one permitted refresh-and-retry.
    #[error("not authenticated")]
    Unauthenticated,
    #[error("session refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),
    #[error("network error: {0}")]
    Network(String),
    #[error("request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("client storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::Network(error.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(error: std::io::Error) -> Self {
        ClientError::Storage(error.to_string())
    }
}
