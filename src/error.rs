//! Error handling for the admin client

use std::fmt;

use calendar_admin_auth::{AuthError, StorageError};
use thiserror::Error;

/// Unified error type for the admin client
#[derive(Error, Debug)]
pub enum Error {
    /// The server rejected the request for good. The session has already
    /// been torn down; retrying locally will not help.
    #[error("Authentication error: status {status} from {endpoint}")]
    Authentication { status: u16, endpoint: String },

    /// A credential was mandatory and none could be obtained
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Non-success response that is not an authorization failure
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Network or transport errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Session layer errors
    #[error("Auth error: {0}")]
    Auth(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new authentication error
    pub fn authentication(status: u16, endpoint: &str) -> Self {
        Error::Authentication {
            status,
            endpoint: endpoint.to_string(),
        }
    }

    /// Create a new session layer error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// True for failures the caller must treat as terminal
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. } | Error::AuthenticationRequired
        )
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AuthenticationRequired => Error::AuthenticationRequired,
            other => Error::auth(other),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::config(format!("storage unavailable: {}", err))
    }
}
