//! Session service
//!
//! Holds the signed-in user, verifies it against the backend and keeps a
//! copy in session storage so a restart within the identity window does
//! not need a round-trip.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, segment};
use crate::config::SessionConfig;
use crate::data::{
    AuthPayload, CACHED_USER_KEY, CACHED_USER_TIMESTAMP_KEY, Expiring, KeyValueStore,
    ProfileCache, ProfilePatch, SESSION_TOKEN_KEY, Throttle, User,
};
use crate::error::{ClientError, Result};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use crate::state::{EventBus, InFlight, OptimisticMutation, StoreEvent};

const MIN_PASSWORD_LENGTH: usize = 8;
const PROFILE_CACHE_TTL: Duration = Duration::from_secs(300);
const PROFILE_CACHE_CAPACITY: u64 = 500;

/// Signup form
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordChange<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

/// Store holding data that belongs to the signed-in user
///
/// Registered stores are cleared whenever the session ends, whatever
/// ended it: logout, a rejected token or a failed verification.
pub trait SessionScoped: Send + Sync {
    fn clear(&self) -> BoxFuture<'_, ()>;
}

struct SessionState {
    user: Option<Expiring<User>>,
    verify_throttle: Throttle,
}

/// Session/identity store
pub struct SessionStore {
    api: Arc<ApiClient>,
    storage: Arc<dyn KeyValueStore>,
    local_storage: Arc<dyn KeyValueStore>,
    events: EventBus,
    profiles: ProfileCache,
    state: RwLock<SessionState>,
    verifying: InFlight<(), User>,
    scoped: std::sync::RwLock<Vec<Weak<dyn SessionScoped>>>,
    identity_ttl: Duration,
    clear_all_on_logout: bool,
}

impl SessionStore {
    /// Create the store, restoring any cached identity and token
    ///
    /// # Arguments
    /// * `storage` - Session-scoped store holding the identity cache
    /// * `local_storage` - Local store; wiped on logout when configured
    pub fn new(
        api: Arc<ApiClient>,
        storage: Arc<dyn KeyValueStore>,
        local_storage: Arc<dyn KeyValueStore>,
        events: EventBus,
        config: &SessionConfig,
    ) -> Self {
        let identity_ttl = config.identity_ttl();
        let user = restore_cached_user(storage.as_ref(), identity_ttl);

        if api.token().is_none() {
            if let Some(token) = storage
                .get(SESSION_TOKEN_KEY)
                .and_then(|v| v.as_str().map(str::to_string))
            {
                api.set_token(Some(token));
            }
        }

        if let Some(cached) = &user {
            tracing::debug!(
                user_id = %cached.value().id,
                age_secs = cached.age().as_secs(),
                "Restored cached identity"
            );
        }

        Self {
            api,
            storage,
            local_storage,
            events,
            profiles: ProfileCache::new(PROFILE_CACHE_TTL, PROFILE_CACHE_CAPACITY),
            state: RwLock::new(SessionState {
                user,
                verify_throttle: Throttle::new(config.verify_min_interval()),
            }),
            verifying: InFlight::new("verify_user"),
            scoped: std::sync::RwLock::new(Vec::new()),
            identity_ttl,
            clear_all_on_logout: config.clear_all_on_logout,
        }
    }

    /// Clear `store` every time the session ends
    pub fn register_scoped(&self, store: Weak<dyn SessionScoped>) {
        if let Ok(mut scoped) = self.scoped.write() {
            scoped.push(store);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn current_user(&self) -> Option<User> {
        self.state
            .read()
            .await
            .user
            .as_ref()
            .map(|u| u.value().clone())
    }

    pub async fn user_id(&self) -> Option<String> {
        self.state
            .read()
            .await
            .user
            .as_ref()
            .map(|u| u.value().id.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.api.has_token() && self.state.read().await.user.is_some()
    }

    /// Signed-in user's id, or `Unauthorized`
    pub async fn require_user_id(&self) -> Result<String> {
        self.user_id().await.ok_or(ClientError::Unauthorized)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Verify the current user against the backend
    ///
    /// Served from cache when the identity is younger than the TTL and
    /// `force` is false, or when a verification ran within the minimum
    /// interval. Concurrent callers share one request.
    ///
    /// # Errors
    /// On failure the user is cleared and the session silently ends
    pub async fn verify_user(&self, force: bool) -> Result<Option<User>> {
        {
            let state = self.state.read().await;
            if let Some(cached) = &state.user {
                if !force && cached.is_fresh() {
                    CACHE_HITS_TOTAL.with_label_values(&["identity"]).inc();
                    return Ok(Some(cached.value().clone()));
                }
            }
            // A verification still in flight is joined below instead
            if state.verify_throttle.is_throttled() && !self.verifying.is_pending(&()) {
                tracing::debug!("Verification skipped; ran recently");
                return Ok(state.user.as_ref().map(|u| u.value().clone()));
            }
        }

        if !self.api.has_token() {
            tracing::debug!("No session token; treating as signed out");
            self.clear_local_state().await;
            return Ok(None);
        }

        CACHE_MISSES_TOTAL.with_label_values(&["identity"]).inc();
        self.state.write().await.verify_throttle.mark();

        let api = self.api.clone();
        let fetched = self
            .verifying
            .run((), move || async move { api.get::<User>("/api/users/me").await })
            .await;

        match fetched {
            Ok(user) => {
                tracing::debug!(user_id = %user.id, "Identity verified");
                self.store_user(user.clone()).await;
                Ok(Some(user))
            }
            Err(error) => {
                tracing::warn!(%error, "Identity verification failed; signing out");
                self.logout().await;
                Err(error)
            }
        }
    }

    // =========================================================================
    // Auth actions
    // =========================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ClientError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let payload: AuthPayload = self
            .api
            .post("/api/auth/login", &Credentials { email, password })
            .await?;

        tracing::info!(user_id = %payload.user.id, "Signed in");
        self.start_session(payload).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<User> {
        if registration.name.trim().is_empty()
            || registration.username.trim().is_empty()
            || registration.email.trim().is_empty()
        {
            return Err(ClientError::Validation(
                "Name, username and email are required".to_string(),
            ));
        }
        if registration.password.len() < MIN_PASSWORD_LENGTH {
            return Err(ClientError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let payload: AuthPayload = self.api.post("/api/auth/register", registration).await?;

        tracing::info!(user_id = %payload.user.id, "Registered");
        self.start_session(payload).await
    }

    /// End the session
    ///
    /// The backend is told on a best-effort basis. Local state is always
    /// cleared: every session-storage key, and every local-storage key
    /// when `clear_all_on_logout` is set.
    pub async fn logout(&self) {
        if self.api.has_token() {
            if let Err(error) = self
                .api
                .post_empty::<IgnoredAny>("/api/auth/logout")
                .await
            {
                tracing::debug!(%error, "Server logout failed; clearing locally");
            }
        }
        self.clear_local_state().await;
        tracing::info!("Signed out");
    }

    /// Drop the session without contacting the backend
    ///
    /// Used when the backend has already rejected the token.
    pub async fn expire(&self) {
        tracing::info!("Session expired");
        self.clear_local_state().await;
    }

    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<User> {
        if patch.is_empty() {
            return self.current_user().await.ok_or(ClientError::Unauthorized);
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ClientError::Validation("Name cannot be empty".to_string()));
        }

        let previous_username = {
            let state = self.state.read().await;
            match &state.user {
                Some(user) => user.value().username.clone(),
                None => return Err(ClientError::Unauthorized),
            }
        };

        let updated = OptimisticMutation::new(&self.state, "update_profile")
            .run(
                |state| {
                    state
                        .user
                        .as_mut()
                        .map(|user| user.value_mut().apply_patch(&patch))
                },
                self.api.put::<_, User>("/api/users/profile", &patch),
                |state, server: &User| {
                    state.user = Some(Expiring::new(server.clone(), self.identity_ttl));
                },
                |state, previous| {
                    if let (Some(user), Some(previous)) = (state.user.as_mut(), previous) {
                        user.value_mut().apply_patch(&previous);
                    }
                },
            )
            .await?;

        self.persist_user(&updated);
        self.profiles.invalidate(&previous_username).await;
        tracing::info!(user_id = %updated.id, "Profile updated");
        Ok(updated)
    }

    pub async fn update_password(&self, current: &str, new: &str) -> Result<()> {
        if current.is_empty() || new.is_empty() {
            return Err(ClientError::Validation(
                "Current and new password are required".to_string(),
            ));
        }
        if new.len() < MIN_PASSWORD_LENGTH {
            return Err(ClientError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if current == new {
            return Err(ClientError::Validation(
                "New password must differ from the current one".to_string(),
            ));
        }

        self.api
            .put::<_, IgnoredAny>(
                "/api/users/password",
                &PasswordChange {
                    current_password: current,
                    new_password: new,
                },
            )
            .await?;

        tracing::info!("Password updated");
        Ok(())
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Look up a profile by username
    ///
    /// The caller's own username is answered from the session without a
    /// request; others go through the profile cache.
    pub async fn get_user_profile(&self, username: &str) -> Result<User> {
        let username = username.trim().trim_start_matches('@');
        if username.is_empty() {
            return Err(ClientError::Validation("Username is required".to_string()));
        }

        if let Some(me) = self.current_user().await {
            if me.username.eq_ignore_ascii_case(username) {
                return Ok(me);
            }
        }

        if let Some(cached) = self.profiles.get(username).await {
            return Ok((*cached).clone());
        }

        let user: User = self
            .api
            .get(&format!("/api/users/{}", segment(username)))
            .await?;
        Ok((*self.profiles.insert(user).await).clone())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn start_session(&self, payload: AuthPayload) -> Result<User> {
        self.api.set_token(Some(payload.token.clone()));
        if let Err(error) = self
            .storage
            .set(SESSION_TOKEN_KEY, serde_json::Value::String(payload.token))
        {
            tracing::warn!(%error, "Failed to persist session token");
        }
        self.store_user(payload.user.clone()).await;
        Ok(payload.user)
    }

    async fn store_user(&self, user: User) {
        self.persist_user(&user);
        let user_id = user.id.clone();
        self.state.write().await.user = Some(Expiring::new(user, self.identity_ttl));
        self.events.publish(StoreEvent::SessionChanged {
            user_id: Some(user_id),
        });
    }

    fn persist_user(&self, user: &User) {
        let result = serde_json::to_value(user)
            .map_err(ClientError::from)
            .and_then(|value| self.storage.set(CACHED_USER_KEY, value))
            .and_then(|_| {
                self.storage.set(
                    CACHED_USER_TIMESTAMP_KEY,
                    serde_json::Value::from(Utc::now().timestamp_millis()),
                )
            });
        if let Err(error) = result {
            tracing::warn!(%error, "Failed to cache identity");
        }
    }

    async fn clear_local_state(&self) {
        self.api.set_token(None);
        {
            let mut state = self.state.write().await;
            state.user = None;
            state.verify_throttle.reset();
        }
        self.profiles.clear();

        if let Err(error) = self.storage.clear() {
            tracing::warn!(%error, "Failed to clear session storage");
        }
        if self.clear_all_on_logout {
            if let Err(error) = self.local_storage.clear() {
                tracing::warn!(%error, "Failed to clear local storage");
            }
        }

        let scoped: Vec<Arc<dyn SessionScoped>> = self
            .scoped
            .read()
            .map(|stores| stores.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default();
        join_all(scoped.iter().map(|store| store.clear())).await;

        self.events
            .publish(StoreEvent::SessionChanged { user_id: None });
    }
}

fn restore_cached_user(storage: &dyn KeyValueStore, ttl: Duration) -> Option<Expiring<User>> {
    let user: User = serde_json::from_value(storage.get(CACHED_USER_KEY)?).ok()?;
    let millis = storage.get(CACHED_USER_TIMESTAMP_KEY)?.as_i64()?;
    let stored_at = Utc.timestamp_millis_opt(millis).single()?;
    Some(Expiring::stored_at(user, stored_at, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::data::MemoryStore;

    fn user(id: &str, username: &str) -> User {
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "name": "Test User",
            "username": username,
        }))
        .unwrap()
    }

    fn store_with(storage: Arc<MemoryStore>) -> SessionStore {
        // Nothing listens on port 9; any request made here fails fast
        let api = Arc::new(
            ApiClient::with_http_client(reqwest::Client::new(), "http://127.0.0.1:9").unwrap(),
        );
        let config = ClientConfig::default();
        SessionStore::new(
            api,
            storage,
            Arc::new(MemoryStore::new()),
            EventBus::default(),
            &config.session,
        )
    }

    #[tokio::test]
    async fn restores_fresh_identity_from_storage() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(
                CACHED_USER_KEY,
                serde_json::to_value(user("u1", "ada")).unwrap(),
            )
            .unwrap();
        storage
            .set(
                CACHED_USER_TIMESTAMP_KEY,
                serde_json::Value::from(Utc::now().timestamp_millis()),
            )
            .unwrap();
        storage
            .set(SESSION_TOKEN_KEY, serde_json::Value::from("tok"))
            .unwrap();

        let session = store_with(storage);
        let verified = session.verify_user(false).await.unwrap();

        assert_eq!(verified.map(|u| u.id).as_deref(), Some("u1"));
        assert!(session.is_authenticated().await);
    }

    #[tokio::test]
    async fn missing_token_signs_out_without_request() {
        let session = store_with(Arc::new(MemoryStore::new()));
        assert_eq!(session.verify_user(true).await.unwrap(), None);
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn own_username_is_served_locally() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(
                CACHED_USER_KEY,
                serde_json::to_value(user("u1", "ada")).unwrap(),
            )
            .unwrap();
        storage
            .set(
                CACHED_USER_TIMESTAMP_KEY,
                serde_json::Value::from(Utc::now().timestamp_millis()),
            )
            .unwrap();

        let session = store_with(storage);
        let profile = session.get_user_profile("@Ada").await.unwrap();
        assert_eq!(profile.id, "u1");
    }

    #[tokio::test]
    async fn password_rules_are_checked_locally() {
        let session = store_with(Arc::new(MemoryStore::new()));

        let short = session.update_password("old-password", "short").await;
        assert!(matches!(short, Err(ClientError::Validation(_))));

        let same = session
            .update_password("same-password", "same-password")
            .await;
        assert!(matches!(same, Err(ClientError::Validation(_))));
    }

    #[tokio::test]
    async fn login_requires_credentials() {
        let session = store_with(Arc::new(MemoryStore::new()));
        let result = session.login("  ", "secret").await;
        assert!(matches!(result, Err(ClientError::Validation(_))));
    }
}
