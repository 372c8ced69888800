//! In-memory caches
//!
//! These caches are volatile and live as long as the client.
//! Uses Moka for the keyed profile cache.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::data::User;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE};

// =============================================================================
// Expiring value
// =============================================================================

/// A value with a freshness window
///
/// `stored_at` is wall-clock so it can round-trip through persisted
/// storage; freshness is judged against the current time.
#[derive(Debug, Clone, PartialEq)]
pub struct Expiring<T> {
    value: T,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

impl<T> Expiring<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self::stored_at(value, Utc::now(), ttl)
    }

    /// Rebuild an entry whose timestamp was persisted elsewhere
    pub fn stored_at(value: T, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }

    /// Check if this entry is still within its TTL
    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }

    /// Restart the freshness window without changing the value
    pub fn touch(&mut self) {
        self.stored_at = Utc::now();
    }
}

// =============================================================================
// Throttle
// =============================================================================

/// Minimum spacing between two occurrences of an action
#[derive(Debug)]
pub struct Throttle {
    last: Option<Instant>,
    min_interval: Duration,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last: None,
            min_interval,
        }
    }

    /// True if the action ran within the last `min_interval`
    pub fn is_throttled(&self) -> bool {
        self.last
            .map(|last| last.elapsed() < self.min_interval)
            .unwrap_or(false)
    }

    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// =============================================================================
// Profile cache
// =============================================================================

/// Profiles fetched by username
///
/// Populated by profile page lookups, dropped on logout.
pub struct ProfileCache {
    /// Username -> User
    profiles: Cache<String, Arc<User>>,
}

impl ProfileCache {
    /// Create new profile cache
    ///
    /// # Arguments
    /// * `ttl` - How long a fetched profile is served without refetching
    /// * `max_items` - Capacity before LRU eviction
    pub fn new(ttl: Duration, max_items: u64) -> Self {
        let profiles = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .build();

        Self { profiles }
    }

    /// Get profile by username
    pub async fn get(&self, username: &str) -> Option<Arc<User>> {
        let result = self.profiles.get(&username.to_ascii_lowercase()).await;

        if result.is_some() {
            CACHE_HITS_TOTAL.with_label_values(&["profile"]).inc();
        } else {
            CACHE_MISSES_TOTAL.with_label_values(&["profile"]).inc();
        }

        result
    }

    /// Insert or update profile
    pub async fn insert(&self, user: User) -> Arc<User> {
        let user = Arc::new(user);
        self.profiles
            .insert(user.username.to_ascii_lowercase(), user.clone())
            .await;

        CACHE_SIZE
            .with_label_values(&["profile"])
            .set(self.profiles.entry_count() as i64);

        user
    }

    pub async fn invalidate(&self, username: &str) {
        self.profiles
            .invalidate(&username.to_ascii_lowercase())
            .await;
    }

    pub fn clear(&self) {
        self.profiles.invalidate_all();
        CACHE_SIZE.with_label_values(&["profile"]).set(0);
    }
}
