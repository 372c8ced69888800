//! User directory
//!
//! The full user list, fetched once and refreshed on an interval while a
//! session is valid. Random picks, featured creators and search are
//! derived locally from that list.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use crate::api::ApiClient;
use crate::data::{Expiring, User};
use crate::error::Result;
use crate::metrics::CACHE_SIZE;
use crate::service::{FollowStore, SessionStore};
use crate::state::{EventBus, InFlight, Poller, RefreshHandle, StoreEvent};

/// Cached user list
pub struct UserDirectory {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    follows: Arc<FollowStore>,
    events: EventBus,
    users: Arc<RwLock<Option<Expiring<Vec<User>>>>>,
    loading: InFlight<(), Vec<User>>,
    refresh_interval: Duration,
}

impl UserDirectory {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionStore>,
        follows: Arc<FollowStore>,
        events: EventBus,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            api,
            session,
            follows,
            events,
            users: Arc::new(RwLock::new(None)),
            loading: InFlight::new("directory"),
            refresh_interval,
        }
    }

    /// Cached list, empty before the first fetch
    pub async fn users(&self) -> Vec<User> {
        self.users
            .read()
            .await
            .as_ref()
            .map(|u| u.value().clone())
            .unwrap_or_default()
    }

    pub async fn is_loaded(&self) -> bool {
        self.users.read().await.is_some()
    }

    /// Fetch the full user list
    ///
    /// Returns the cached list when one is fresh and `force` is false.
    /// Concurrent callers share one request.
    pub async fn get_all_users(&self, force: bool) -> Result<Vec<User>> {
        if !force {
            if let Some(cached) = self.users.read().await.as_ref() {
                if cached.is_fresh() {
                    return Ok(cached.value().clone());
                }
            }
        }

        let api = self.api.clone();
        let slot = self.users.clone();
        let ttl = self.refresh_interval;
        let users = self
            .loading
            .run((), move || async move {
                let users: Vec<User> = api.get("/api/users").await?;
                *slot.write().await = Some(Expiring::new(users.clone(), ttl));
                Ok(users)
            })
            .await?;

        CACHE_SIZE
            .with_label_values(&["directory"])
            .set(users.len() as i64);
        tracing::debug!(count = users.len(), "Directory loaded");
        self.events
            .publish(StoreEvent::DirectoryRefreshed { users: users.len() });
        Ok(users)
    }

    /// Refetch the list every refresh interval while a session is valid
    ///
    /// Dropping the handle stops the refresh.
    pub fn spawn_refresh(self: &Arc<Self>) -> RefreshHandle {
        let directory = Arc::clone(self);
        Poller::spawn("directory", self.refresh_interval, move || {
            let directory = directory.clone();
            async move {
                if !directory.session.is_authenticated().await {
                    tracing::trace!("No session; skipping directory refresh");
                    return Ok(());
                }
                directory.get_all_users(true).await.map(|_| ())
            }
        })
    }

    /// Up to `count` users in random order
    pub async fn get_random_users(&self, count: usize) -> Vec<User> {
        let users = self.users().await;
        random_users(users, count, &mut rand::thread_rng())
    }

    /// Users worth following: not the signed-in user, not already
    /// followed, most followers first
    pub async fn get_featured_creators(&self, limit: usize) -> Vec<User> {
        let users = self.users().await;
        let me = self.session.user_id().await;
        let following = self.follows.following_ids().await;
        featured_creators(users, me.as_deref(), &following, limit)
    }

    /// Case-insensitive match on name or username
    pub async fn search_users(&self, query: &str) -> Vec<User> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.users
            .read()
            .await
            .as_ref()
            .map(|cached| {
                cached
                    .value()
                    .iter()
                    .filter(|u| {
                        u.username.to_lowercase().contains(&query)
                            || u.name.to_lowercase().contains(&query)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget the list (logout)
    pub async fn reset(&self) {
        *self.users.write().await = None;
        CACHE_SIZE.with_label_values(&["directory"]).set(0);
    }
}

/// Shuffle and keep the first `count`
pub fn random_users<R: Rng + ?Sized>(mut users: Vec<User>, count: usize, rng: &mut R) -> Vec<User> {
    users.shuffle(rng);
    users.truncate(count);
    users
}

pub fn featured_creators(
    users: Vec<User>,
    me: Option<&str>,
    following: &HashSet<String>,
    limit: usize,
) -> Vec<User> {
    let mut candidates: Vec<User> = users
        .into_iter()
        .filter(|u| Some(u.id.as_str()) != me && !following.contains(&u.id))
        .collect();
    // Stable, so equal counts keep directory order
    candidates.sort_by(|a, b| b.followers_count.cmp(&a.followers_count));
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn user(id: &str, followers: u64) -> User {
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "username": id,
            "followersCount": followers,
        }))
        .unwrap()
    }

    #[test]
    fn featured_excludes_self_and_followed() {
        let users = vec![user("me", 100), user("a", 5), user("b", 50), user("c", 10)];
        let following: HashSet<String> = ["b".to_string()].into();

        let featured = featured_creators(users, Some("me"), &following, 10);
        let ids: Vec<&str> = featured.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn featured_respects_limit() {
        let users = vec![user("a", 1), user("b", 2), user("c", 3)];
        let featured = featured_creators(users, None, &HashSet::new(), 2);
        assert_eq!(featured.len(), 2);
        assert_eq!(featured[0].id, "c");
    }

    #[test]
    fn random_users_is_a_subset() {
        let users = vec![user("a", 0), user("b", 0), user("c", 0), user("d", 0)];
        let mut rng = StdRng::seed_from_u64(7);

        let picked = random_users(users.clone(), 2, &mut rng);
        assert_eq!(picked.len(), 2);
        assert!(picked.iter().all(|p| users.contains(p)));

        let all = random_users(users.clone(), 10, &mut rng);
        assert_eq!(all.len(), 4);
    }
}
