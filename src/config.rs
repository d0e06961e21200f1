//! Configuration options for the admin client

use std::path::PathBuf;
use std::time::Duration;

use calendar_admin_auth::SessionOptions;

use crate::error::Error;

/// Configuration options for the admin client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Origin of the admin backend, e.g. `https://calendar.example.com`
    pub base_url: String,

    /// Directory for persisted identity metadata and cookies.
    /// `None` keeps everything in memory.
    pub storage_dir: Option<PathBuf>,

    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// Login endpoint, relative to the origin
    pub login_endpoint: String,

    /// Logout endpoint, relative to the origin
    pub logout_endpoint: String,

    /// Path the in-memory navigator starts on
    pub initial_path: String,

    /// Session layer options
    pub session: SessionOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            storage_dir: None,
            request_timeout: Some(Duration::from_secs(30)),
            login_endpoint: "/auth/login".to_string(),
            logout_endpoint: "/auth/logout".to_string(),
            initial_path: "/".to_string(),
            session: SessionOptions::default(),
        }
    }
}

impl ClientOptions {
    pub fn new(base_url: &str) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Read options from `ADMIN_API_URL` (required), `ADMIN_STORAGE_DIR`
    /// and `ADMIN_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("ADMIN_API_URL")
            .map_err(|_| Error::config("ADMIN_API_URL environment variable not found"))?;

        let mut options = Self::new(&base_url);

        if let Ok(dir) = std::env::var("ADMIN_STORAGE_DIR") {
            options = options.with_storage_dir(Some(PathBuf::from(dir)));
        }

        if let Ok(secs) = std::env::var("ADMIN_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::config(format!("ADMIN_REQUEST_TIMEOUT_SECS is not a number: {}", secs))
            })?;
            options = options.with_request_timeout(Some(Duration::from_secs(secs)));
        }

        Ok(options)
    }

    /// Set the backend origin
    pub fn with_base_url(mut self, value: &str) -> Self {
        self.base_url = value.trim_end_matches('/').to_string();
        self
    }

    /// Set where persisted state lives
    pub fn with_storage_dir(mut self, value: Option<PathBuf>) -> Self {
        self.storage_dir = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the login endpoint
    pub fn with_login_endpoint(mut self, value: &str) -> Self {
        self.login_endpoint = value.to_string();
        self
    }

    /// Set the logout endpoint
    pub fn with_logout_endpoint(mut self, value: &str) -> Self {
        self.logout_endpoint = value.to_string();
        self
    }

    /// Set the path the navigator starts on
    pub fn with_initial_path(mut self, value: &str) -> Self {
        self.initial_path = value.to_string();
        self
    }

    /// Set the session layer options
    pub fn with_session_options(mut self, value: SessionOptions) -> Self {
        self.session = value;
        self
    }
}
