//! Configuration options for the session layer

use std::time::Duration;

/// Name of the anti-forgery cookie
pub const CSRF_COOKIE_NAME: &str = "XSRF-TOKEN";

/// Header carrying the anti-forgery token on mutating requests
pub const CSRF_HEADER_NAME: &str = "X-CSRF-Token";

/// Persistent-storage key holding the last-known user
pub const USER_STORAGE_KEY: &str = "admin_user";

/// Persistent-storage key holding cached permissions
pub const PERMISSIONS_STORAGE_KEY: &str = "admin_permissions";

/// Configuration options for the session layer
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// A token is treated as expired this long before its real expiry
    pub expiry_buffer: Duration,

    /// Lifetime assumed when neither the server nor the token states one
    pub default_token_ttl: Duration,

    /// Renewal endpoint, relative to the origin
    pub refresh_path: String,

    /// Login surface the failure path navigates to
    pub login_path: String,

    /// How long the failure handler ignores further failures after a teardown
    pub failure_cooldown: Duration,

    pub csrf_cookie_name: String,

    pub csrf_header_name: String,

    /// Number of characters in a generated anti-forgery token
    pub csrf_token_length: usize,

    pub csrf_cookie_max_age: Duration,

    /// Reported in security event logs
    pub user_agent: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            expiry_buffer: Duration::from_secs(5),
            default_token_ttl: Duration::from_secs(15 * 60),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/login".to_string(),
            failure_cooldown: Duration::from_secs(1),
            csrf_cookie_name: CSRF_COOKIE_NAME.to_string(),
            csrf_header_name: CSRF_HEADER_NAME.to_string(),
            csrf_token_length: 43,
            csrf_cookie_max_age: Duration::from_secs(180 * 24 * 60 * 60),
            user_agent: concat!("calendar-admin-auth/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SessionOptions {
    pub fn with_expiry_buffer(mut self, value: Duration) -> Self {
        self.expiry_buffer = value;
        self
    }

    pub fn with_default_token_ttl(mut self, value: Duration) -> Self {
        self.default_token_ttl = value;
        self
    }

    pub fn with_refresh_path(mut self, value: &str) -> Self {
        self.refresh_path = value.to_string();
        self
    }

    pub fn with_login_path(mut self, value: &str) -> Self {
        self.login_path = value.to_string();
        self
    }

    pub fn with_failure_cooldown(mut self, value: Duration) -> Self {
        self.failure_cooldown = value;
        self
    }

    /// Token length is clamped to at least 32 characters
    pub fn with_csrf_token_length(mut self, value: usize) -> Self {
        self.csrf_token_length = value.max(32);
        self
    }

    pub fn with_user_agent(mut self, value: &str) -> Self {
        self.user_agent = value.to_string();
        self
    }
}
