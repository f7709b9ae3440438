use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use super::error::{ClientError, RefreshError};
use super::refresh::{RefreshCoordinator, RefreshOutcome};
use super::token_store::TokenStore;
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::auth::{MessageResponse, RefreshResponse};

const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const EVENT_CAPACITY: usize = 16;

/// Signals broadcast to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A silent refresh failed; the session is over.
    ForceLogout,
}

/// HTTP client wrapper that attaches the access token to every request and,
/// on a 401, refreshes it once and replays the request.
///
/// Clones share the token store, the refresh coordinator and the event
/// channel, so one `ApiClient` (and its clones) make up one client session.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    refresh: Arc<RefreshCoordinator>,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            tokens: TokenStore::new(),
            refresh: Arc::new(RefreshCoordinator::new()),
            events,
        }
    }

    /// Client for a server at `base_url`, e.g. `http://localhost:5000/api-v1`.
    pub fn connect(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self::new(Arc::new(HttpTransport::new(base_url)?)))
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn set_access_token(&self, token: Option<String>) {
        self.tokens.set(token);
    }

    /// Sends `request` through both interceptors.
    ///
    /// Any status other than 401, and a 401 on a request already marked
    /// retried, is returned unchanged. Otherwise the request waits for (or
    /// performs) a refresh and is replayed once with the new token.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        if request.bearer.is_none() {
            request.bearer = self.tokens.get();
        }

        let response = self.transport.send(request.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED || request.retried {
            return Ok(response);
        }

        request.retried = true;
        let RefreshOutcome { result, .. } = self
            .refresh
            .run_committing(|| self.perform_refresh(), |outcome| self.apply_refresh(outcome, true))
            .await;
        match result {
            Ok(token) => {
                log::debug!("replaying {} {} after refresh", request.method, request.path);
                request.bearer = Some(token);
                self.transport.send(request).await
            }
            Err(error) => Err(ClientError::RefreshFailed(error)),
        }
    }

    /// Obtains a new access token from the refresh cookie, joining any refresh
    /// already in flight. Failure is returned to the caller only.
    pub async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        self.refresh
            .run_committing(|| self.perform_refresh(), |outcome| self.apply_refresh(outcome, false))
            .await
            .result
    }

    /// Asks the server to clear the refresh cookie.
    pub async fn logout_remote(&self) -> Result<MessageResponse, ClientError> {
        self.send(ApiRequest::post(LOGOUT_PATH).without_refresh())
            .await?
            .into_result()
    }

    pub async fn fetch_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(ApiRequest::get(path)).await?.into_result()
    }

    pub async fn post_data<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?)
            .await?
            .into_result()
    }

    pub async fn update_data<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?)
            .await?
            .into_result()
    }

    pub async fn delete_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(ApiRequest::delete(path)).await?.into_result()
    }

    /// The leader's side of a refresh. Nothing is stored here: the outcome goes
    /// through [`apply_refresh`](Self::apply_refresh) only if no logout reset
    /// the coordinator meanwhile.
    async fn perform_refresh(&self) -> Result<String, RefreshError> {
        let request = ApiRequest::post(REFRESH_PATH).without_refresh();
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if !response.status.is_success() {
            return Err(RefreshError::Rejected(response.status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        Ok(body.access_token)
    }

    /// Runs under the coordinator lock, before any waiter is released.
    fn apply_refresh(&self, outcome: &Result<String, RefreshError>, signal_logout: bool) {
        match outcome {
            Ok(token) => {
                self.tokens.set(Some(token.clone()));
                log::debug!("access token refreshed");
            }
            Err(error) => {
                self.tokens.clear();
                if signal_logout {
                    log::warn!("silent refresh failed: {}", error);
                    // No subscribers is fine: nothing is listening for the signal.
                    let _ = self.events.send(SessionEvent::ForceLogout);
                }
            }
        }
    }
}
