//! Session lifecycle for the authentication client.
//!
//! `SessionManager` decides, on startup and on every privileged call, whether
//! the user is signed in, whether the access token needs a silent refresh, and
//! when a failure means the stored credentials must go.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::config::{normalize_api_url, Config, Theme};
use crate::models::User;
use crate::storage::Storage;

use super::credentials::{CredentialStore, TokenPair};
use super::session::{SessionEvent, SessionState};
use super::validation::{validate_login, validate_signup, ValidationError};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the session event channel.
/// The periodic task sends at most one event per tick, so a small buffer is plenty.
const EVENT_CHANNEL_SIZE: usize = 32;

/// Base used to parse a bare OAuth callback query string
const CALLBACK_BASE_URL: &str = "http://localhost/";

type RefreshFlight = Shared<BoxFuture<'static, bool>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    storage: Arc<dyn Storage>,
    credentials: CredentialStore,
    config: RwLock<Config>,
    api: RwLock<ApiClient>,
    state: watch::Sender<SessionState>,
    /// Identifies the current credential set; bumped on every sign-in and sign-out
    epoch: AtomicU64,
    /// Held while comparing the epoch and touching stored tokens
    session_lock: Mutex<()>,
    refresh_flight: Mutex<Option<RefreshFlight>>,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let handle = self
            .auto_refresh
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Owns the session: stored credentials, the current user, token refresh and
/// the periodic refresh task.
///
/// Clone is cheap and every clone drives the same session, so front-ends can
/// hand copies to their event handlers.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager, loading the saved configuration from `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Result<Self, ApiError> {
        let config = Config::load(storage.as_ref())?;
        Self::with_config(storage, config)
    }

    /// Create a manager with an explicit configuration
    pub fn with_config(storage: Arc<dyn Storage>, config: Config) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config.api_url)?;
        Ok(Self::with_client(storage, config, api))
    }

    /// Create a manager around a preconfigured API client.
    /// The client is re-pointed at `config.api_url`.
    pub fn with_client(storage: Arc<dyn Storage>, config: Config, api: ApiClient) -> Self {
        let api = api.with_base_url(&config.api_url);
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        debug!(api_url = %config.api_url, auto_refresh = config.auto_refresh, "Session manager created");

        Self {
            inner: Arc::new(Inner {
                credentials: CredentialStore::new(storage.clone()),
                storage,
                config: RwLock::new(config),
                api: RwLock::new(api),
                state,
                epoch: AtomicU64::new(0),
                session_lock: Mutex::new(()),
                refresh_flight: Mutex::new(None),
                auto_refresh: Mutex::new(None),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    // ===== Observers =====

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// Watch session state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Take the receiver for periodic refresh results. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        lock(&self.inner.events_rx).take()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    pub fn config(&self) -> Config {
        read(&self.inner.config).clone()
    }

    pub(crate) fn api(&self) -> ApiClient {
        read(&self.inner.api).clone()
    }

    fn set_state(&self, state: SessionState) {
        debug!(state = state.label(), "Session state changed");
        self.inner.state.send_replace(state);
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    // ===== Session Lifecycle =====

    /// Check the stored credentials against the API.
    ///
    /// Returns `Ok(None)` when nothing is stored. On a 401 the token pair is
    /// refreshed once and `/api/users/me` retried once; any other failure
    /// evicts the stored credentials.
    pub async fn bootstrap(&self) -> Result<Option<User>, ApiError> {
        let epoch = self.epoch();
        let mut refreshed = false;

        loop {
            let Some(token) = self.inner.credentials.access_token()? else {
                debug!("No stored access token");
                self.stop_auto_refresh();
                self.set_state(SessionState::Unauthenticated);
                return Ok(None);
            };

            match self.api().current_user(&token).await {
                Ok(user) => {
                    {
                        let _guard = lock(&self.inner.session_lock);
                        if self.epoch() != epoch {
                            debug!("Session changed during auth check, discarding result");
                            return Ok(self.current_user());
                        }
                        info!(user_id = %user.id, role = %user.role, "Session authenticated");
                        self.set_state(SessionState::Authenticated(user.clone()));
                    }
                    self.start_auto_refresh();
                    return Ok(Some(user));
                }
                Err(ApiError::TokenExpired) if !refreshed => {
                    {
                        let _guard = lock(&self.inner.session_lock);
                        if self.epoch() != epoch {
                            debug!("Session changed during auth check, discarding 401");
                            return Ok(self.current_user());
                        }
                        self.set_state(SessionState::Refreshing);
                    }
                    refreshed = true;
                    if self.refresh_session().await {
                        continue;
                    }
                    if !self.evict_if_current(epoch) {
                        return Ok(self.current_user());
                    }
                    info!("Token refresh failed, signed out");
                    return Err(ApiError::TokenExpired);
                }
                Err(e) => {
                    if !self.evict_if_current(epoch) {
                        debug!(error = %e, "Session changed during auth check, discarding error");
                        return Ok(self.current_user());
                    }
                    warn!(error = %e, "Auth check failed, session cleared");
                    return Err(e);
                }
            }
        }
    }

    /// Exchange the stored refresh token for a new pair.
    ///
    /// Concurrent callers share one request and all see its outcome. Failure
    /// is reported, never acted on: evicting the credentials is up to the caller.
    pub async fn refresh_session(&self) -> bool {
        let flight = {
            let mut slot = lock(&self.inner.refresh_flight);
            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let manager = self.clone();
                    let flight = async move {
                        let refreshed = manager.exchange_refresh_token().await;
                        lock(&manager.inner.refresh_flight).take();
                        refreshed
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    async fn exchange_refresh_token(&self) -> bool {
        let epoch = self.epoch();
        let refresh_token = match self.inner.credentials.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No refresh token stored");
                return false;
            }
            Err(e) => {
                error!(error = %e, "Failed to read refresh token");
                return false;
            }
        };

        let tokens = match self.api().refresh_token(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return false;
            }
        };

        let _guard = lock(&self.inner.session_lock);
        if self.epoch() != epoch {
            info!("Session changed during token refresh, discarding new tokens");
            return false;
        }
        match self.inner.credentials.store(&tokens) {
            Ok(()) => {
                info!("Access token refreshed");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to store refreshed tokens");
                false
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let email = email.trim();
        validate_login(email, password)?;

        let tokens = self.api().login(email, password).await?;
        info!("Login successful");
        self.begin_session(&tokens)?;
        self.load_signed_in_user().await
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<User, ApiError> {
        let name = name.trim();
        let email = email.trim();
        validate_signup(name, email, password)?;

        let tokens = self.api().signup(name, email, password).await?;
        info!("Account created");
        self.begin_session(&tokens)?;
        self.load_signed_in_user().await
    }

    /// Revoke the refresh token (best effort) and forget the session.
    pub async fn logout(&self) {
        match self.inner.credentials.refresh_token() {
            Ok(Some(refresh_token)) => {
                if let Err(e) = self.api().logout(&refresh_token).await {
                    warn!(error = %e, "Logout request failed");
                }
            }
            Ok(None) => debug!("No refresh token to revoke"),
            Err(e) => warn!(error = %e, "Failed to read refresh token for logout"),
        }

        self.clear_session();
        info!("Logged out");
    }

    /// Browser URL that starts Google sign-in
    pub fn google_sign_in_url(&self) -> String {
        self.api().google_auth_url()
    }

    /// Finish Google sign-in from the URL (or bare query string) the API redirected to.
    ///
    /// Returns `Ok(None)` when the URL carries neither tokens nor an error.
    pub async fn complete_oauth_callback(&self, callback: &str) -> Result<Option<User>, ApiError> {
        let callback = callback.trim();
        let parsed = if callback.contains("://") {
            Url::parse(callback)
        } else {
            Url::parse(CALLBACK_BASE_URL)
                .and_then(|base| base.join(&format!("?{}", callback.trim_start_matches('?'))))
        };
        let url = parsed
            .map_err(|e| ApiError::InvalidResponse(format!("Invalid callback URL: {}", e)))?;

        let mut access_token = None;
        let mut refresh_token = None;
        let mut oauth_error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "accessToken" if !value.is_empty() => access_token = Some(value.into_owned()),
                "refreshToken" if !value.is_empty() => refresh_token = Some(value.into_owned()),
                "error" => oauth_error = Some(value.into_owned()),
                _ => {}
            }
        }

        match (access_token, refresh_token, oauth_error) {
            (Some(access), Some(refresh), _) => {
                info!("Google sign-in completed");
                self.begin_session(&TokenPair::new(access, refresh))?;
                self.load_signed_in_user().await.map(Some)
            }
            (_, _, Some(reason)) => {
                warn!(reason = %reason, "Google sign-in failed");
                Err(ApiError::OAuthDenied(reason))
            }
            _ => Ok(None),
        }
    }

    /// Store a freshly issued pair as a new session
    fn begin_session(&self, tokens: &TokenPair) -> Result<(), ApiError> {
        self.stop_auto_refresh();
        let _guard = lock(&self.inner.session_lock);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.credentials.store(tokens)?;
        Ok(())
    }

    async fn load_signed_in_user(&self) -> Result<User, ApiError> {
        self.bootstrap().await?.ok_or(ApiError::NotAuthenticated)
    }

    /// Forget the session unconditionally: tokens, timer and user
    pub fn clear_session(&self) {
        let _guard = lock(&self.inner.session_lock);
        self.clear_while_locked();
    }

    /// Clear the session only if no sign-in or sign-out happened since `epoch`.
    /// Returns whether it was cleared.
    fn evict_if_current(&self, epoch: u64) -> bool {
        let _guard = lock(&self.inner.session_lock);
        if self.epoch() != epoch {
            debug!("Session changed, skipping eviction");
            return false;
        }
        self.clear_while_locked();
        true
    }

    fn clear_while_locked(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.inner.credentials.clear() {
            error!(error = %e, "Failed to clear stored credentials");
        }
        self.stop_auto_refresh();
        self.set_state(SessionState::Unauthenticated);
    }

    // ===== Authenticated Requests =====

    fn require_access_token(&self) -> Result<String, ApiError> {
        self.inner
            .credentials
            .access_token()?
            .ok_or(ApiError::NotAuthenticated)
    }

    /// Run a bearer-authenticated call, refreshing and retrying once on a 401.
    ///
    /// A dead refresh token evicts the credentials. A second 401 is returned
    /// as-is; there is never more than one retry.
    pub(crate) async fn authorized<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        F: Fn(ApiClient, String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let epoch = self.epoch();
        let token = self.require_access_token()?;

        match op(self.api(), token).await {
            Err(ApiError::TokenExpired) => {
                debug!("Access token rejected, refreshing before a single retry");
                if !self.refresh_session().await {
                    self.evict_if_current(epoch);
                    return Err(ApiError::TokenExpired);
                }
                let token = self.require_access_token()?;
                op(self.api(), token).await
            }
            result => result,
        }
    }

    // ===== Periodic Refresh =====

    /// Start the periodic user-list refresh if enabled. No-op when already running.
    pub fn start_auto_refresh(&self) {
        let config = self.config();
        if !config.auto_refresh {
            debug!("Auto refresh disabled");
            return;
        }

        let mut slot = lock(&self.inner.auto_refresh);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let period = config.refresh_period();
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SessionManager { inner }.auto_refresh_tick().await;
            }
        });

        debug!(interval_ms = config.refresh_interval, "Auto refresh started");
        *slot = Some(handle);
    }

    /// Stop the periodic refresh. No-op when not running.
    pub fn stop_auto_refresh(&self) {
        if let Some(handle) = lock(&self.inner.auto_refresh).take() {
            handle.abort();
            debug!("Auto refresh stopped");
        }
    }

    #[cfg(test)]
    fn auto_refresh_task_id(&self) -> Option<tokio::task::Id> {
        lock(&self.inner.auto_refresh).as_ref().map(|handle| handle.id())
    }

    pub fn is_auto_refresh_running(&self) -> bool {
        lock(&self.inner.auto_refresh)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn auto_refresh_tick(&self) {
        if !self.current_user().is_some_and(|user| user.is_admin()) {
            return;
        }

        debug!("Periodic user list refresh");
        let event = match self.list_users().await {
            Ok(users) => SessionEvent::Users(users),
            Err(e) => {
                warn!(error = %e, "Periodic user list refresh failed");
                SessionEvent::Error(e.user_message())
            }
        };
        if let Err(e) = self.inner.events_tx.try_send(event) {
            debug!(error = %e, "Dropping session event");
        }
    }

    // ===== Configuration =====

    /// Point the client at another API. The caller re-runs `bootstrap()`.
    pub fn set_api_url(&self, url: &str) -> Result<(), ApiError> {
        let url = normalize_api_url(url);
        if url.is_empty() {
            return Err(ValidationError::MissingApiUrl.into());
        }

        let config = {
            let mut config = write(&self.inner.config);
            config.api_url = url.clone();
            config.clone()
        };
        config.save(self.inner.storage.as_ref())?;

        let api = self.api().with_base_url(&url);
        *write(&self.inner.api) = api;
        info!(api_url = %url, "API URL updated");
        Ok(())
    }

    pub fn toggle_theme(&self) -> Result<Theme, ApiError> {
        let config = {
            let mut config = write(&self.inner.config);
            config.theme = config.theme.toggled();
            config.clone()
        };
        config.save(self.inner.storage.as_ref())?;
        Ok(config.theme)
    }

    /// Drop the saved configuration and go back to environment defaults
    pub fn reset_config(&self) -> Result<Config, ApiError> {
        Config::reset(self.inner.storage.as_ref())?;
        let defaults = Config::default();

        let api = self.api().with_base_url(&defaults.api_url);
        *write(&self.inner.api) = api;
        *write(&self.inner.config) = defaults.clone();
        info!(api_url = %defaults.api_url, "Configuration reset");
        Ok(defaults)
    }

    /// Adopt the first candidate whose `/health` answers 2xx
    pub async fn detect_api_url(&self, candidates: &[String]) -> Result<Option<String>, ApiError> {
        for candidate in candidates {
            let probe = self.api().with_base_url(candidate);
            if probe.is_healthy().await {
                self.set_api_url(probe.base_url())?;
                return Ok(Some(probe.base_url().to_string()));
            }
            debug!(url = %candidate, "API URL candidate unreachable");
        }
        Ok(None)
    }
}
