//! Client-side session state: who is signed in, and what the UI may show.
//!
//! An [`AuthSession`] starts `Initializing`. [`AuthSession::initialize`]
//! settles it: when a user profile was persisted by an earlier run, a silent
//! refresh decides between `Authenticated` and `Unauthenticated`. Explicit
//! logout and a [`SessionEvent::ForceLogout`] from the API client perform the
//! same transition back to `Unauthenticated`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::api::{ApiClient, SessionEvent};
use super::error::ClientError;
use super::transport::ApiRequest;
use crate::auth::{LoginRequest, LoginResponse};
use crate::models::UserProfile;

/// Routes reachable without signing in.
pub const PUBLIC_ROUTES: &[&str] = &[
    "/",
    "/sign-in",
    "/sign-up",
    "/verify-email",
    "/forgot-password",
    "/reset-password",
];

/// Where unauthenticated visitors of protected routes are sent.
pub const SIGN_IN_ROUTE: &str = "/sign-in";

const LOGIN_PATH: &str = "/auth/login";

pub fn is_public_route(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    PUBLIC_ROUTES.contains(&path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Authenticated,
    Unauthenticated,
}

/// What the UI reads from the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub access_token: Option<String>,
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    Allow,
    /// The session is still initializing; show a loading state.
    Wait,
    Redirect(String),
}

/// Durable storage for the signed-in user's profile. Its presence is the
/// marker that a silent refresh is worth attempting on startup.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self) -> Result<Option<UserProfile>, ClientError>;
    async fn save(&self, profile: &UserProfile) -> Result<(), ClientError>;
    async fn clear(&self) -> Result<(), ClientError>;
}

/// Stores the profile as a JSON file.
pub struct FileProfileStore {
    path: PathBuf,
}

impl FileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn load(&self) -> Result<Option<UserProfile>, ClientError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                log::warn!("ignoring unreadable profile at {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    async fn save(&self, profile: &UserProfile) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec(profile)?).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryProfileStore {
    profile: Mutex<Option<UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: UserProfile) -> Self {
        Self {
            profile: Mutex::new(Some(profile)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<UserProfile>> {
        self.profile.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self) -> Result<Option<UserProfile>, ClientError> {
        Ok(self.slot().clone())
    }

    async fn save(&self, profile: &UserProfile) -> Result<(), ClientError> {
        *self.slot() = Some(profile.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        *self.slot() = None;
        Ok(())
    }
}

/// The router the session redirects through.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn navigate(&self, path: &str);
}

/// Records navigations; starts at the given path.
pub struct MemoryNavigator {
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(vec![start.into()]),
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap_or_else(|| "/".to_string())
    }

    fn navigate(&self, path: &str) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }
}

/// Responses of GETs made through [`AuthSession::query`], keyed by path.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl QueryCache {
    pub fn get(&self, path: &str) -> Option<Value> {
        self.lock().get(path).cloned()
    }

    pub fn insert(&self, path: &str, value: Value) {
        self.lock().insert(path.to_string(), value);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    state: SessionState,
    user: Option<UserProfile>,
}

pub struct AuthSession {
    api: ApiClient,
    profiles: Arc<dyn ProfileStore>,
    navigator: Arc<dyn Navigator>,
    cache: QueryCache,
    inner: RwLock<Inner>,
}

impl AuthSession {
    pub fn new(
        api: ApiClient,
        profiles: Arc<dyn ProfileStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            api,
            profiles,
            navigator,
            cache: QueryCache::default(),
            inner: RwLock::new(Inner {
                state: SessionState::Initializing,
                user: None,
            }),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn state(&self) -> SessionState {
        self.read().state
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read().user.clone()
    }

    pub fn snapshot(&self) -> ClientSession {
        let inner = self.read();
        ClientSession {
            access_token: self.api.tokens().get(),
            user: inner.user.clone(),
            is_authenticated: inner.state == SessionState::Authenticated,
            is_loading: inner.state == SessionState::Initializing,
        }
    }

    /// Restores the session of an earlier run, if there was one.
    pub async fn initialize(&self) -> SessionState {
        let profile = match self.profiles.load().await {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("failed to read stored profile: {}", e);
                None
            }
        };

        let Some(profile) = profile else {
            self.set(SessionState::Unauthenticated, None);
            return SessionState::Unauthenticated;
        };

        match self.api.refresh_access_token().await {
            Ok(_) => {
                log::info!("restored session for {}", profile.email);
                self.set(SessionState::Authenticated, Some(profile));
                SessionState::Authenticated
            }
            Err(e) => {
                log::info!("stored session could not be restored: {}", e);
                self.logout().await;
                SessionState::Unauthenticated
            }
        }
    }

    pub async fn login(&self, response: LoginResponse) -> Result<(), ClientError> {
        self.profiles.save(&response.user).await?;
        self.api.set_access_token(Some(response.access_token));
        self.set(SessionState::Authenticated, Some(response.user));
        Ok(())
    }

    /// Posts credentials to the login endpoint and, on success, logs in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let credentials = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&credentials)?
            .without_refresh();
        let response: LoginResponse = self.api.send(request).await?.into_result()?;
        let user = response.user.clone();
        self.login(response).await?;
        Ok(user)
    }

    pub async fn logout(&self) {
        // Reset first, so a refresh still in flight can no longer store a token.
        self.api.coordinator().reset();
        if let Err(e) = self.profiles.clear().await {
            log::warn!("failed to clear stored profile: {}", e);
        }
        self.api.tokens().clear();
        self.cache.clear();

        if let Err(e) = self.api.logout_remote().await {
            log::warn!("server logout failed: {}", e);
        }

        self.set(SessionState::Unauthenticated, None);
        let current = self.navigator.current_path();
        if !is_public_route(&current) {
            self.navigator.navigate(SIGN_IN_ROUTE);
        }
    }

    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::ForceLogout => {
                log::info!("session ended by failed refresh");
                self.logout().await;
            }
        }
    }

    /// Applies API client events to this session until the session is dropped
    /// or the event channel closes.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.api.subscribe();
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("session listener skipped {} event(s)", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                match session.upgrade() {
                    Some(session) => session.handle_event(event).await,
                    None => break,
                }
            }
        })
    }

    pub fn guard(&self, path: &str) -> RouteAccess {
        if is_public_route(path) {
            return RouteAccess::Allow;
        }
        match self.state() {
            SessionState::Initializing => RouteAccess::Wait,
            SessionState::Authenticated => RouteAccess::Allow,
            SessionState::Unauthenticated => RouteAccess::Redirect(SIGN_IN_ROUTE.to_string()),
        }
    }

    /// GETs `path` through the API client, serving repeats from the cache.
    pub async fn query<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(serde_json::from_value(cached)?);
        }
        let value: Value = self.api.fetch_data(path).await?;
        self.cache.insert(path, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    fn set(&self, state: SessionState, user: Option<UserProfile>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.state = state;
        inner.user = user;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::RefreshError;
    use crate::client::transport::{ApiResponse, Transport};
    use chrono::Utc;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use uuid::Uuid;

    fn profile() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            is_email_verified: true,
            created_at: Utc::now(),
        }
    }

    /// Server whose refresh cookie is valid while `cookie_valid` is set. With
    /// `hold_refresh`, a refresh decides its answer on arrival and then waits
    /// for `release` before sending it.
    struct FakeBackend {
        cookie_valid: AtomicBool,
        hold_refresh: bool,
        release: Notify,
        refresh_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        me_calls: AtomicUsize,
        user: UserProfile,
    }

    impl FakeBackend {
        fn new(cookie_valid: bool) -> Arc<Self> {
            Self::build(cookie_valid, false)
        }

        fn holding_refresh(cookie_valid: bool) -> Arc<Self> {
            Self::build(cookie_valid, true)
        }

        fn build(cookie_valid: bool, hold_refresh: bool) -> Arc<Self> {
            Arc::new(Self {
                cookie_valid: AtomicBool::new(cookie_valid),
                hold_refresh,
                release: Notify::new(),
                refresh_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
                me_calls: AtomicUsize::new(0),
                user: profile(),
            })
        }
    }

    fn unauthorized() -> ApiResponse {
        ApiResponse::new(StatusCode::UNAUTHORIZED, br#"{"error":"Unauthorized"}"#.to_vec())
    }

    #[async_trait]
    impl Transport for FakeBackend {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
            let ok = |body: Value| -> Result<ApiResponse, ClientError> {
                Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
            };
            match request.path.as_str() {
                "/auth/refresh" => {
                    self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                    let valid = self.cookie_valid.load(Ordering::SeqCst);
                    if self.hold_refresh {
                        self.release.notified().await;
                    }
                    if valid {
                        ok(json!({ "accessToken": "fresh" }))
                    } else {
                        Ok(unauthorized())
                    }
                }
                "/auth/login" => {
                    let body = request.body.unwrap_or_default();
                    if body["password"] == "correct-horse" {
                        self.cookie_valid.store(true, Ordering::SeqCst);
                        ok(json!({ "accessToken": "fresh", "user": self.user }))
                    } else {
                        Ok(unauthorized())
                    }
                }
                "/auth/logout" => {
                    self.logout_calls.fetch_add(1, Ordering::SeqCst);
                    self.cookie_valid.store(false, Ordering::SeqCst);
                    ok(json!({ "message": "Logged out successfully" }))
                }
                "/users/me" if request.bearer.as_deref() == Some("fresh") => {
                    self.me_calls.fetch_add(1, Ordering::SeqCst);
                    ok(json!(self.user))
                }
                _ => Ok(unauthorized()),
            }
        }
    }

    fn session(
        backend: &Arc<FakeBackend>,
        profiles: Arc<dyn ProfileStore>,
        start: &str,
    ) -> (Arc<AuthSession>, Arc<MemoryNavigator>) {
        let navigator = Arc::new(MemoryNavigator::new(start));
        let session = AuthSession::new(ApiClient::new(backend.clone()), profiles, navigator.clone());
        (Arc::new(session), navigator)
    }

    #[test]
    fn test_public_routes() {
        for path in ["/", "/sign-in", "/sign-up/", "/reset-password?token=abc", "/verify-email#top"] {
            assert!(is_public_route(path), "{}", path);
        }
        for path in ["/dashboard", "/tasks/1", "/sign-in/extra"] {
            assert!(!is_public_route(path), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_initialize_without_marker_skips_refresh() {
        let backend = FakeBackend::new(true);
        let (session, _) = session(&backend, Arc::new(MemoryProfileStore::new()), "/");
        assert!(session.snapshot().is_loading);
        assert_eq!(session.guard("/dashboard"), RouteAccess::Wait);

        assert_eq!(session.initialize().await, SessionState::Unauthenticated);
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            session.guard("/dashboard"),
            RouteAccess::Redirect(SIGN_IN_ROUTE.to_string())
        );
        assert_eq!(session.guard("/sign-up"), RouteAccess::Allow);
    }

    #[tokio::test]
    async fn test_initialize_restores_session_with_marker() {
        let backend = FakeBackend::new(true);
        let profiles = Arc::new(MemoryProfileStore::with_profile(backend.user.clone()));
        let (session, _) = session(&backend, profiles, "/dashboard");

        assert_eq!(session.initialize().await, SessionState::Authenticated);
        let snapshot = session.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.access_token.as_deref(), Some("fresh"));
        assert_eq!(snapshot.user, Some(backend.user.clone()));
    }

    #[tokio::test]
    async fn test_initialize_failure_logs_out() {
        for (start, history) in [
            ("/dashboard", vec!["/dashboard", SIGN_IN_ROUTE]),
            ("/", vec!["/"]),
        ] {
            let backend = FakeBackend::new(false);
            let profiles = Arc::new(MemoryProfileStore::with_profile(backend.user.clone()));
            let (session, navigator) = session(&backend, profiles.clone(), start);
            let mut events = session.api().subscribe();

            assert_eq!(session.initialize().await, SessionState::Unauthenticated);
            assert_eq!(profiles.load().await.unwrap(), None);
            assert_eq!(session.snapshot().access_token, None);
            assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
            assert_eq!(navigator.history(), history, "start = {}", start);
            assert!(events.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_logout_discards_refresh_in_flight() {
        for cookie_valid in [true, false] {
            let backend = FakeBackend::holding_refresh(cookie_valid);
            let profiles = Arc::new(MemoryProfileStore::new());
            let (session, navigator) = session(&backend, profiles.clone(), "/dashboard");
            session
                .login(LoginResponse {
                    access_token: "expired".into(),
                    user: backend.user.clone(),
                })
                .await
                .unwrap();
            let mut events = session.api().subscribe();

            let request = {
                let api = session.api().clone();
                tokio::spawn(async move { api.fetch_data::<Value>("/users/me").await })
            };
            while backend.refresh_calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }

            session.logout().await;
            backend.release.notify_one();

            let result = request.await.unwrap();
            assert!(
                matches!(result, Err(ClientError::RefreshFailed(RefreshError::Abandoned))),
                "cookie_valid = {}: {:?}",
                cookie_valid,
                result
            );
            assert!(!session.api().tokens().is_set());
            assert!(!session.api().coordinator().is_refreshing());
            assert!(events.try_recv().is_err());
            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
            assert_eq!(navigator.history(), vec!["/dashboard", SIGN_IN_ROUTE]);
        }
    }

    #[tokio::test]
    async fn test_sign_in_then_logout() {
        let backend = FakeBackend::new(false);
        let profiles = Arc::new(MemoryProfileStore::new());
        let (session, navigator) = session(&backend, profiles.clone(), "/dashboard");
        session.initialize().await;

        let user = session.sign_in("ada@example.com", "correct-horse").await.unwrap();
        assert_eq!(user, backend.user);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(profiles.load().await.unwrap(), Some(backend.user.clone()));

        let me: UserProfile = session.query("/users/me").await.unwrap();
        assert_eq!(me.email, "ada@example.com");
        assert_eq!(session.cache().len(), 1);

        session.logout().await;
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(profiles.load().await.unwrap(), None);
        assert!(!session.api().tokens().is_set());
        assert!(session.cache().is_empty());
        assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(navigator.current_path(), SIGN_IN_ROUTE);

        let after = session.api().fetch_data::<Value>("/users/me").await;
        assert!(matches!(after, Err(ClientError::RefreshFailed(_))));
    }

    #[tokio::test]
    async fn test_bad_credentials_do_not_refresh() {
        let backend = FakeBackend::new(true);
        let (session, _) = session(&backend, Arc::new(MemoryProfileStore::new()), "/sign-in");

        let result = session.sign_in("ada@example.com", "wrong").await;
        assert!(matches!(result, Err(ClientError::Unauthenticated)));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Initializing);
    }

    #[tokio::test]
    async fn test_query_is_cached() {
        let backend = FakeBackend::new(true);
        let (session, _) = session(&backend, Arc::new(MemoryProfileStore::new()), "/");
        session.sign_in("ada@example.com", "correct-horse").await.unwrap();

        let _: Value = session.query("/users/me").await.unwrap();
        let _: Value = session.query("/users/me").await.unwrap();
        assert_eq!(backend.me_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_logout_event_redirects_from_protected_route() {
        let backend = FakeBackend::new(false);
        let profiles = Arc::new(MemoryProfileStore::with_profile(backend.user.clone()));
        let (session, navigator) = session(&backend, profiles.clone(), "/tasks/42");
        session
            .login(LoginResponse {
                access_token: "expired".into(),
                user: backend.user.clone(),
            })
            .await
            .unwrap();
        let listener = session.spawn_event_listener();

        let result = session.api().fetch_data::<Value>("/users/me").await;
        assert!(matches!(result, Err(ClientError::RefreshFailed(_))));

        while session.state() != SessionState::Unauthenticated {
            tokio::task::yield_now().await;
        }
        while navigator.current_path() != SIGN_IN_ROUTE {
            tokio::task::yield_now().await;
        }
        assert_eq!(profiles.load().await.unwrap(), None);
        assert_eq!(navigator.history(), vec!["/tasks/42", SIGN_IN_ROUTE]);
        listener.abort();
    }

    #[tokio::test]
    async fn test_logout_on_public_route_stays_put() {
        let backend = FakeBackend::new(true);
        let (session, navigator) = session(&backend, Arc::new(MemoryProfileStore::new()), "/");
        session.sign_in("ada@example.com", "correct-horse").await.unwrap();
        session.logout().await;
        assert_eq!(navigator.history(), vec!["/"]);
    }

    #[tokio::test]
    async fn test_file_profile_store() {
        let path = std::env::temp_dir()
            .join(format!("taskhub-{}", Uuid::new_v4()))
            .join("profile.json");
        let store = FileProfileStore::new(&path);
        assert_eq!(store.load().await.unwrap(), None);

        let user = profile();
        store.save(&user).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(user));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);

        tokio::fs::write(&path, b"not json").await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}
