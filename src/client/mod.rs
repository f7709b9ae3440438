//! Client core: what a TaskHub front end needs to talk to the API.
//!
//! - [`TokenStore`] keeps the access token in memory only.
//! - [`ApiClient`] attaches it to outgoing requests and, on a 401, refreshes it
//!   through the [`RefreshCoordinator`] and replays the request once.
//! - [`AuthSession`] tracks the signed-in user and reacts to forced logouts.

pub mod api;
pub mod error;
pub mod refresh;
pub mod session;
pub mod token_store;
pub mod transport;

pub use api::{ApiClient, SessionEvent};
pub use error::{ClientError, RefreshError};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::{
    is_public_route, AuthSession, ClientSession, FileProfileStore, MemoryNavigator,
    MemoryProfileStore, Navigator, ProfileStore, QueryCache, RouteAccess, SessionState,
    PUBLIC_ROUTES, SIGN_IN_ROUTE,
};
pub use token_store::TokenStore;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
