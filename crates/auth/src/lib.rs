//! Session layer for the calendar admin client
//!
//! This crate holds the short-lived access credential and renews it, keeps
//! the anti-forgery token, and tears client state down when authorization is
//! lost for good.
//!
//! - [`SessionStore`]: current credential, expiry and user, single-flight renewal, change notification
//! - [`AntiForgeryTokenStore`]: random token persisted as a `SameSite=Strict` cookie
//! - [`AuthFailureHandler`]: wipes session and cached data, then navigates to the login page
//!
//! Browser capabilities (persistent storage, cookies, navigation, time,
//! randomness) sit behind small traits so the logic runs anywhere.

pub mod clock;
pub mod csrf;
pub mod failure;
pub mod jwt;
pub mod navigation;
pub mod options;
pub mod random;
pub mod session;
pub mod storage;
pub mod types;

use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use csrf::AntiForgeryTokenStore;
pub use failure::{AuthFailureHandler, FailureReason, FailureState};
pub use navigation::{MemoryHistory, Navigator};
pub use options::SessionOptions;
pub use random::{OsRandom, SecureRandom};
pub use session::{SessionStore, Subscription};
pub use storage::{HttpCookieStore, JsonFileStore, KeyValueStore, MemoryStore, StorageError};
pub use types::{AuthResponse, SessionSnapshot, UserInfo};

/// Errors surfaced by the session layer
#[derive(Error, Debug)]
pub enum AuthError {
    /// No credential could be obtained where one was mandatory
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),
}

/// Why a renewal produced no credential. Never leaves [`SessionStore`].
#[derive(Error, Debug)]
pub(crate) enum RenewalFailure {
    #[error("renewal rejected with status {0}")]
    Rejected(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("renewal response carried no access token")]
    MissingToken,
}
