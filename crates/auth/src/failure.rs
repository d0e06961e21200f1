//! Terminal authorization failures: wipe client state and leave for the login page

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::navigation::Navigator;
use crate::options::{PERMISSIONS_STORAGE_KEY, USER_STORAGE_KEY};
use crate::session::SessionStore;
use crate::storage::KeyValueStore;

/// Why the user is being sent to the login page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    SessionExpired,
    AccessDenied,
    Logout,
}

impl FailureReason {
    /// 401 means the session is gone; everything else is treated as a denial
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::SessionExpired,
            _ => Self::AccessDenied,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionExpired => "session_expired",
            Self::AccessDenied => "access_denied",
            Self::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureState {
    Idle,
    HandlingFailure,
}

/// Storage keys swept on teardown besides the fixed identity keys.
///
/// Deliberately loose: anything that looks like a cached response or holds
/// a token or session goes.
pub fn is_sensitive_key(key: &str) -> bool {
    key.starts_with("cache_")
        || key.starts_with("api_")
        || key.contains("Token")
        || key.contains("Session")
}

pub struct AuthFailureHandler {
    session: SessionStore,
    storage: Arc<dyn KeyValueStore>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    login_path: String,
    cooldown: Duration,
    user_agent: String,
    tearing_down: AtomicBool,
    handled_at: Mutex<Option<u64>>,
}

impl AuthFailureHandler {
    pub fn new(
        session: SessionStore,
        storage: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let options = session.options();
        Self {
            login_path: options.login_path.clone(),
            cooldown: options.failure_cooldown,
            user_agent: options.user_agent.clone(),
            session,
            storage,
            navigator,
            clock,
            tearing_down: AtomicBool::new(false),
            handled_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> FailureState {
        if self.tearing_down.load(Ordering::SeqCst) || self.in_cooldown(self.clock.now_millis()) {
            FailureState::HandlingFailure
        } else {
            FailureState::Idle
        }
    }

    fn in_cooldown(&self, now: u64) -> bool {
        let handled_at = self.handled_at.lock().unwrap_or_else(PoisonError::into_inner);
        self.cooling_down(*handled_at, now)
    }

    fn cooling_down(&self, handled_at: Option<u64>, now: u64) -> bool {
        handled_at
            .map(|at| now < at.saturating_add(self.cooldown.as_millis() as u64))
            .unwrap_or(false)
    }

    /// Tear the session down after the server rejected a request with
    /// `status`, then navigate to the login page.
    ///
    /// Returns `false` without doing anything when a failure is already being
    /// handled or was handled within the cooldown window.
    pub fn handle_auth_error(&self, status: u16, endpoint: Option<&str>) -> bool {
        let now = self.clock.now_millis();
        {
            let mut handled_at = self.handled_at.lock().unwrap_or_else(PoisonError::into_inner);
            if self.cooling_down(*handled_at, now) || self.tearing_down.swap(true, Ordering::SeqCst) {
                debug!("Auth failure {} ignored: already handling one", status);
                return false;
            }
            *handled_at = Some(now);
        }

        let timestamp = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now as i64)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| now.to_string());
        warn!(
            "Security event: authorization failure status={} endpoint={} timestamp={} user_agent={}",
            status,
            endpoint.unwrap_or("-"),
            timestamp,
            self.user_agent
        );

        self.teardown();
        self.redirect(FailureReason::from_status(status));

        self.tearing_down.store(false, Ordering::SeqCst);
        true
    }

    /// User-initiated sign out: same teardown, reason `logout`
    pub fn logout(&self) {
        info!("Logging out");
        self.teardown();
        self.redirect(FailureReason::Logout);
    }

    fn teardown(&self) {
        self.session.clear_session();

        for key in [USER_STORAGE_KEY, PERMISSIONS_STORAGE_KEY] {
            if let Err(err) = self.storage.remove(key) {
                error!("Failed to remove {}: {}", key, err);
            }
        }

        match self.storage.keys() {
            Ok(keys) => {
                for key in keys.iter().filter(|key| is_sensitive_key(key)) {
                    if let Err(err) = self.storage.remove(key) {
                        error!("Failed to remove cached entry {}: {}", key, err);
                    }
                }
            }
            Err(err) => error!("Failed to enumerate cached entries: {}", err),
        }
    }

    fn redirect(&self, reason: FailureReason) {
        let current = self.navigator.current_path();
        let return_url = if current.starts_with(&self.login_path) {
            "/".to_string()
        } else {
            current
        };

        let target = format!(
            "{}?reason={}&returnUrl={}",
            self.login_path,
            reason.as_str(),
            urlencoding::encode(&return_url)
        );
        info!("Redirecting to {}", target);
        self.navigator.replace(&target);
    }
}
