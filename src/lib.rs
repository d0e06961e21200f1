//! Calendar Admin Client Library
//!
//! An authenticated HTTP client for the calendar admin dashboard backend.
//! It keeps the short-lived bearer credential renewed, sends the
//! double-submit anti-forgery token on state-changing calls, and tears the
//! session down when the backend rejects it for good.

pub mod config;
pub mod error;
pub mod fetch;

use std::sync::Arc;

use calendar_admin_auth::{
    AntiForgeryTokenStore, AuthFailureHandler, AuthResponse, Clock, HttpCookieStore,
    JsonFileStore, KeyValueStore, MemoryHistory, MemoryStore, Navigator, OsRandom,
    SessionSnapshot, SessionStore, SystemClock,
};
use log::{debug, info, warn};
use reqwest::cookie::Jar;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::config::ClientOptions;
use crate::error::Error;
use crate::fetch::{RequestOptions, SecureRequestExecutor};

pub use calendar_admin_auth as auth;

const STORAGE_FILE: &str = "storage.json";
const COOKIE_FILE: &str = "cookies.json";

/// The main entry point for the admin client
pub struct AdminClient {
    /// The backend origin
    pub base_url: Url,
    /// HTTP client used for requests, sharing the cookie jar
    pub http_client: Client,
    /// Client options
    pub options: ClientOptions,
    session: SessionStore,
    failures: Arc<AuthFailureHandler>,
    executor: SecureRequestExecutor,
    navigator: Arc<dyn Navigator>,
}

impl AdminClient {
    /// Create a new admin client
    ///
    /// # Example
    ///
    /// ```
    /// use calendar_admin_client::{AdminClient, config::ClientOptions};
    ///
    /// let client = AdminClient::new(ClientOptions::new("https://calendar.example.com")).unwrap();
    /// assert!(!client.session().has_active_session());
    /// ```
    pub fn new(options: ClientOptions) -> Result<Self, Error> {
        let navigator = Arc::new(MemoryHistory::new(&options.initial_path));
        Self::new_with_platform(options, Arc::new(SystemClock), navigator)
    }

    /// Create a new admin client with an explicit clock and navigator
    ///
    /// Hosts that own navigation (a desktop shell, a test harness) pass their
    /// own [`Navigator`]; tests pass a [`calendar_admin_auth::ManualClock`].
    pub fn new_with_platform(
        options: ClientOptions,
        clock: Arc<dyn Clock>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(&options.base_url)?;

        let (storage, cookie_backing): (Arc<dyn KeyValueStore>, Arc<dyn KeyValueStore>) =
            match &options.storage_dir {
                Some(dir) => {
                    debug!("Persisting session state under {}", dir.display());
                    (
                        Arc::new(JsonFileStore::open(dir.join(STORAGE_FILE))?),
                        Arc::new(JsonFileStore::open(dir.join(COOKIE_FILE))?),
                    )
                }
                None => (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())),
            };

        let jar = Arc::new(Jar::default());
        let cookies = Arc::new(HttpCookieStore::new(
            Arc::clone(&jar),
            base_url.clone(),
            cookie_backing,
        )?);

        let mut builder = Client::builder()
            .cookie_provider(jar)
            .user_agent(options.session.user_agent.clone());
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let csrf = AntiForgeryTokenStore::new(
            cookies,
            Arc::new(OsRandom),
            Arc::clone(&clock),
            &options.session,
            base_url.scheme() == "https",
        );

        let session = SessionStore::new(
            &base_url,
            http_client.clone(),
            Arc::clone(&storage),
            csrf,
            Arc::clone(&clock),
            options.session.clone(),
        )?;

        let failures = Arc::new(AuthFailureHandler::new(
            session.clone(),
            storage,
            Arc::clone(&navigator),
            clock,
        ));

        let executor = SecureRequestExecutor::new(
            http_client.clone(),
            base_url.clone(),
            session.clone(),
            Arc::clone(&failures),
        );

        Ok(Self {
            base_url,
            http_client,
            options,
            session,
            failures,
            executor,
            navigator,
        })
    }

    /// Get a reference to the session store
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Get a reference to the anti-forgery token store
    pub fn csrf(&self) -> &AntiForgeryTokenStore {
        self.session.csrf()
    }

    /// Get a reference to the auth failure handler
    pub fn failures(&self) -> &AuthFailureHandler {
        &self.failures
    }

    /// Get a reference to the request executor
    pub fn executor(&self) -> &SecureRequestExecutor {
        &self.executor
    }

    /// Get a reference to the navigator the failure handler redirects through
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Sign in with username and password
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionSnapshot, Error> {
        let request = RequestOptions::post()
            .json(&json!({ "username": username, "password": password }))?
            .with_auth(false)
            .with_auto_refresh(false);

        let response = self
            .executor
            .execute(&self.options.login_endpoint, request)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => Error::auth(format!("login rejected: {}", body)),
                code => Error::Http { status: code, body },
            });
        }

        let auth: AuthResponse = response.json().await?;
        self.session.set_session_from_auth_response(auth);
        info!("Logged in as {}", username);

        Ok(self.session.snapshot())
    }

    /// Sign out. The backend is told on a best-effort basis; local state is
    /// cleared and the navigator sent to the login page either way.
    pub async fn logout(&self) {
        if let Some(token) = self.session.peek_access_token() {
            let request = RequestOptions::post()
                .header("Authorization", &format!("Bearer {}", token))
                .with_auth(false)
                .with_auto_refresh(false);

            match self
                .executor
                .execute(&self.options.logout_endpoint, request)
                .await
            {
                Ok(response) if !response.status().is_success() => {
                    warn!("Logout endpoint returned {}", response.status());
                }
                Ok(_) => {}
                Err(err) => warn!("Logout request failed: {}", err),
            }
        }

        self.failures.logout();
    }

    /// Try to resume a session from the refresh cookie alone, e.g. at start-up
    pub async fn restore(&self) -> Option<SessionSnapshot> {
        self.session.refresh_access_token(false).await?;
        Some(self.session.snapshot())
    }

    /// Send a request through the executor
    pub async fn execute(&self, target: &str, options: RequestOptions) -> Result<Response, Error> {
        self.executor.execute(target, options).await
    }

    /// Send a request through the executor and decode the JSON response
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<T, Error> {
        self.executor.execute_json(target, options).await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::error::Error;
    pub use crate::fetch::{RequestOptions, SecureRequestExecutor};
    pub use crate::AdminClient;
    pub use calendar_admin_auth::{SessionSnapshot, UserInfo};
}
