//! Session state, credential renewal and change notification

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use reqwest::header::HeaderMap;
use reqwest::Client;
use url::Url;

use crate::clock::Clock;
use crate::csrf::AntiForgeryTokenStore;
use crate::jwt;
use crate::options::{SessionOptions, USER_STORAGE_KEY};
use crate::storage::KeyValueStore;
use crate::types::{AuthResponse, SessionSnapshot, UserInfo};
use crate::{AuthError, RenewalFailure};

/// Observer callback. Receives a read-only snapshot on every change.
pub type Listener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

type RenewalFuture = Shared<BoxFuture<'static, Option<String>>>;

#[derive(Debug, Default)]
struct SessionState {
    access_token: Option<String>,
    expires_at_ms: u64,
    user: UserInfo,
}

struct InFlightRenewal {
    generation: u64,
    future: RenewalFuture,
}

struct SessionInner {
    refresh_url: Url,
    http_client: Client,
    storage: Arc<dyn KeyValueStore>,
    csrf: AntiForgeryTokenStore,
    clock: Arc<dyn Clock>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    renewal: Mutex<Option<InFlightRenewal>>,
    latest_generation: AtomicU64,
    // Bumped by every clear so an in-flight renewal can tell it was discarded
    epoch: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the current access credential and coordinates its renewal.
///
/// Cloning is cheap and every clone shares the same session. At most one
/// renewal is outstanding at a time; callers that ask for a credential while a
/// renewal is running await that same renewal instead of starting another.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    /// Create a store for the backend at `base_url`.
    ///
    /// Identity metadata persisted by a previous run is restored; the access
    /// token never is, so the first credential request triggers a renewal.
    pub fn new(
        base_url: &Url,
        http_client: Client,
        storage: Arc<dyn KeyValueStore>,
        csrf: AntiForgeryTokenStore,
        clock: Arc<dyn Clock>,
        options: SessionOptions,
    ) -> Result<Self, AuthError> {
        let refresh_url = base_url.join(&options.refresh_path)?;

        let user = match storage.get(USER_STORAGE_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<UserInfo>(&raw).unwrap_or_else(|err| {
                warn!("Ignoring unreadable persisted user: {}", err);
                UserInfo::default()
            }),
            Ok(None) => UserInfo::default(),
            Err(err) => {
                error!("Failed to read persisted user: {}", err);
                UserInfo::default()
            }
        };

        Ok(Self {
            inner: Arc::new(SessionInner {
                refresh_url,
                http_client,
                storage,
                csrf,
                clock,
                options,
                state: Mutex::new(SessionState {
                    user,
                    ..Default::default()
                }),
                renewal: Mutex::new(None),
                latest_generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn csrf(&self) -> &AntiForgeryTokenStore {
        &self.inner.csrf
    }

    /// True while a token is held and `now` is strictly before its expiry
    /// minus the configured buffer
    pub fn has_active_session(&self) -> bool {
        let state = lock(&self.inner.state);
        self.is_live(&state)
    }

    fn is_live(&self, state: &SessionState) -> bool {
        let buffer = self.inner.options.expiry_buffer.as_millis() as u64;
        state.access_token.is_some()
            && self.inner.clock.now_millis() < state.expires_at_ms.saturating_sub(buffer)
    }

    /// The held token, live or not, without any I/O
    pub fn peek_access_token(&self) -> Option<String> {
        lock(&self.inner.state).access_token.clone()
    }

    /// Absolute expiry in epoch milliseconds, `None` without a token
    pub fn expires_at_ms(&self) -> Option<u64> {
        let state = lock(&self.inner.state);
        state.access_token.as_ref().map(|_| state.expires_at_ms)
    }

    pub fn user(&self) -> UserInfo {
        lock(&self.inner.state).user.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.inner.state);
        SessionSnapshot {
            is_authenticated: self.is_live(&state),
            user: state.user.clone(),
            expires_at: state.access_token.as_ref().map(|_| state.expires_at_ms),
        }
    }

    /// A live token, renewing first if the current one is missing or expired
    pub async fn get_access_token(&self) -> Option<String> {
        {
            let state = lock(&self.inner.state);
            if self.is_live(&state) {
                return state.access_token.clone();
            }
        }

        self.refresh_access_token(false).await
    }

    /// Like [`get_access_token`](Self::get_access_token) for call sites that
    /// cannot proceed without a credential
    pub async fn require_access_token(&self) -> Result<String, AuthError> {
        self.get_access_token()
            .await
            .ok_or(AuthError::AuthenticationRequired)
    }

    /// Install the credential returned by a login or renewal
    pub fn set_session_from_auth_response(&self, response: AuthResponse) {
        let now = self.inner.clock.now_millis();
        let expires_at_ms = match response.expires_in {
            Some(seconds) => now.saturating_add(seconds.saturating_mul(1000)),
            None => jwt::decode_claims(&response.access_token)
                .and_then(|claims| claims.expires_at_secs)
                .map(|exp| exp.saturating_mul(1000))
                .unwrap_or_else(|| self.default_expiry(now)),
        };

        let user = {
            let mut state = lock(&self.inner.state);
            state.access_token = Some(response.access_token);
            state.expires_at_ms = expires_at_ms;
            if let Some(update) = response.user {
                state.user.merge(update);
            }
            state.user.clone()
        };

        self.persist_user(&user);
        self.inner.csrf.ensure_token();
        debug!("Session set; expires at {}", expires_at_ms);
        self.notify();
    }

    /// Install a bare bearer token.
    ///
    /// Expiry and identity are read from the token's own claims when it can be
    /// decoded. Identity fields resolve as decoded claim, then already-known
    /// value, then `fallback_user`.
    pub fn set_session_from_raw_credential(&self, token: &str, fallback_user: Option<UserInfo>) {
        let now = self.inner.clock.now_millis();
        let claims = jwt::decode_claims(token).unwrap_or_default();
        let expires_at_ms = claims
            .expires_at_secs
            .map(|exp| exp.saturating_mul(1000))
            .unwrap_or_else(|| self.default_expiry(now));

        let user = {
            let mut state = lock(&self.inner.state);
            let mut user = fallback_user.unwrap_or_default();
            user.merge(std::mem::take(&mut state.user));
            user.merge(claims.user);

            state.access_token = Some(token.to_string());
            state.expires_at_ms = expires_at_ms;
            state.user = user;
            state.user.clone()
        };

        self.persist_user(&user);
        self.inner.csrf.ensure_token();
        self.notify();
    }

    fn default_expiry(&self, now: u64) -> u64 {
        now.saturating_add(self.inner.options.default_token_ttl.as_millis() as u64)
    }

    /// Renew the access token.
    ///
    /// Without `force`, joins the renewal already in flight if there is one.
    /// With `force`, always starts a new one. Never fails: any rejection or
    /// transport error clears the session and yields `None`.
    ///
    /// The renewal runs on its own task, so dropping the returned future does
    /// not cancel it.
    pub async fn refresh_access_token(&self, force: bool) -> Option<String> {
        let renewal = self.join_or_start_renewal(force);
        renewal.await
    }

    fn join_or_start_renewal(&self, force: bool) -> RenewalFuture {
        let mut slot = lock(&self.inner.renewal);

        if !force {
            if let Some(in_flight) = slot.as_ref() {
                debug!("Joining renewal {} already in flight", in_flight.generation);
                return in_flight.future.clone();
            }
        }

        let generation = self.inner.latest_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let store = self.clone();

        let task = tokio::spawn(async move {
            let _guard = RenewalGuard {
                inner: Arc::clone(&store.inner),
                generation,
            };
            store.renew(generation, epoch).await
        });

        let future = async move {
            match task.await {
                Ok(token) => token,
                Err(err) => {
                    error!("Token renewal task failed: {}", err);
                    None
                }
            }
        }
        .boxed()
        .shared();

        debug!("Started renewal {}", generation);
        *slot = Some(InFlightRenewal {
            generation,
            future: future.clone(),
        });
        future
    }

    async fn renew(&self, generation: u64, epoch: u64) -> Option<String> {
        let outcome = self.request_renewal().await;

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            info!("Discarding renewal {}: session was cleared while it was in flight", generation);
            return None;
        }

        // A forced renewal started after this one owns the session now
        if self.inner.latest_generation.load(Ordering::SeqCst) != generation {
            debug!("Renewal {} superseded; deferring to the newer one", generation);
            return self.newer_renewal_outcome(generation).await;
        }

        match outcome {
            Ok(response) => {
                let token = response.access_token.clone();
                self.set_session_from_auth_response(response);
                info!("Access token renewed");
                Some(token)
            }
            Err(err) => {
                warn!("Token renewal failed: {}", err);
                self.clear_session();
                None
            }
        }
    }

    async fn newer_renewal_outcome(&self, generation: u64) -> Option<String> {
        let newer = lock(&self.inner.renewal)
            .as_ref()
            .filter(|in_flight| in_flight.generation > generation)
            .map(|in_flight| in_flight.future.clone());

        match newer {
            Some(future) => future.await,
            None => {
                let state = lock(&self.inner.state);
                if self.is_live(&state) {
                    state.access_token.clone()
                } else {
                    None
                }
            }
        }
    }

    async fn request_renewal(&self) -> Result<AuthResponse, RenewalFailure> {
        let mut headers = HeaderMap::new();
        self.inner.csrf.apply_header(&mut headers, true);

        let response = self
            .inner
            .http_client
            .post(self.inner.refresh_url.clone())
            .headers(headers)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenewalFailure::Rejected(status.as_u16()));
        }

        let body: AuthResponse = response.json().await?;
        if body.access_token.is_empty() {
            return Err(RenewalFailure::MissingToken);
        }

        Ok(body)
    }

    /// Forget the session: token, expiry, user, persisted identity, any
    /// outstanding renewal and the anti-forgery token. Listeners are notified
    /// even when there was nothing to clear.
    pub fn clear_session(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.renewal).take();
        *lock(&self.inner.state) = SessionState::default();

        if let Err(err) = self.inner.storage.remove(USER_STORAGE_KEY) {
            error!("Failed to remove persisted user: {}", err);
        }
        self.inner.csrf.clear_token();
        debug!("Session cleared");
        self.notify();
    }

    /// Register `listener`. It is called once right away with the current
    /// snapshot, then after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).push((id, Arc::clone(&listener)));

        listener(&self.snapshot());

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&snapshot);
        }
    }

    fn persist_user(&self, user: &UserInfo) {
        let result = serde_json::to_string(user)
            .map_err(AuthError::from)
            .and_then(|raw| {
                self.inner
                    .storage
                    .set(USER_STORAGE_KEY, &raw)
                    .map_err(AuthError::from)
            });

        if let Err(err) = result {
            error!("Failed to persist user: {}", err);
        }
    }
}

/// Clears the in-flight handle when a renewal task ends, however it ends
struct RenewalGuard {
    inner: Arc<SessionInner>,
    generation: u64,
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.inner.renewal);
        if slot.as_ref().map(|r| r.generation) == Some(self.generation) {
            *slot = None;
        }
    }
}

/// Returned by [`SessionStore::subscribe`]
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    inner: Weak<SessionInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}
