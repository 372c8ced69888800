//! Follow service
//!
//! Keeps the signed-in user's following/followers lists and applies
//! follow/unfollow optimistically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, segment};
use crate::data::{FlagStatus, FollowCounts, FollowEdge, UserSummary, is_temp_id};
use crate::error::{ClientError, Result};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use crate::service::SessionStore;
use crate::state::{EventBus, InFlight, OptimisticMutation, StoreEvent};

/// Which follow mutation a request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FollowOp {
    Follow,
    Unfollow,
}

#[derive(Default)]
struct FollowState {
    following: Vec<FollowEdge>,
    followers: Vec<FollowEdge>,
    /// Answers from the status endpoint, by target user id
    known_status: HashMap<String, bool>,
}

impl FollowState {
    fn is_following(&self, target_id: &str) -> bool {
        self.following.iter().any(|e| e.following_id == target_id)
    }
}

/// Follow-graph store
pub struct FollowStore {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    events: EventBus,
    state: Arc<RwLock<FollowState>>,
    mutations: InFlight<(FollowOp, String), bool>,
    status_checks: InFlight<String, bool>,
}

impl FollowStore {
    pub fn new(api: Arc<ApiClient>, session: Arc<SessionStore>, events: EventBus) -> Self {
        Self {
            api,
            session,
            events,
            state: Arc::new(RwLock::new(FollowState::default())),
            mutations: InFlight::new("follow_mutation"),
            status_checks: InFlight::new("follow_status"),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn following(&self) -> Vec<FollowEdge> {
        self.state.read().await.following.clone()
    }

    pub async fn followers(&self) -> Vec<FollowEdge> {
        self.state.read().await.followers.clone()
    }

    /// Ids of everyone the signed-in user follows, per the local list
    pub async fn following_ids(&self) -> HashSet<String> {
        self.state
            .read()
            .await
            .following
            .iter()
            .map(|e| e.following_id.clone())
            .collect()
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Fetch who `user_id` follows
    ///
    /// When `user_id` is the signed-in user, the local following list is
    /// replaced with the result.
    pub async fn fetch_following(&self, user_id: &str) -> Result<Vec<UserSummary>> {
        let users: Vec<UserSummary> = self
            .api
            .get(&format!("/api/follow/{}/following", segment(user_id)))
            .await?;

        if self.session.user_id().await.as_deref() == Some(user_id) {
            let edges = users
                .iter()
                .map(|u| FollowEdge::confirmed(user_id, &u.id, Some(u.clone())))
                .collect();
            self.state.write().await.following = edges;
        }

        tracing::debug!(user_id = %user_id, count = users.len(), "Fetched following");
        Ok(users)
    }

    /// Fetch who follows `user_id`
    pub async fn fetch_followers(&self, user_id: &str) -> Result<Vec<UserSummary>> {
        let users: Vec<UserSummary> = self
            .api
            .get(&format!("/api/follow/{}/followers", segment(user_id)))
            .await?;

        if self.session.user_id().await.as_deref() == Some(user_id) {
            let edges = users
                .iter()
                .map(|u| FollowEdge::confirmed(&u.id, user_id, Some(u.clone())))
                .collect();
            self.state.write().await.followers = edges;
        }

        tracing::debug!(user_id = %user_id, count = users.len(), "Fetched followers");
        Ok(users)
    }

    pub async fn follow_counts(&self, user_id: &str) -> Result<FollowCounts> {
        self.api
            .get(&format!("/api/follow/{}/counts", segment(user_id)))
            .await
    }

    /// Whether the signed-in user follows `target_id`
    ///
    /// The local following list answers first; otherwise the status
    /// endpoint is asked once and its answer remembered.
    pub async fn check_follow_status(&self, target_id: &str) -> Result<bool> {
        {
            let state = self.state.read().await;
            if state.is_following(target_id) {
                CACHE_HITS_TOTAL.with_label_values(&["follow_status"]).inc();
                return Ok(true);
            }
            if let Some(known) = state.known_status.get(target_id) {
                CACHE_HITS_TOTAL.with_label_values(&["follow_status"]).inc();
                return Ok(*known);
            }
        }
        CACHE_MISSES_TOTAL
            .with_label_values(&["follow_status"])
            .inc();

        let api = self.api.clone();
        let state = self.state.clone();
        let target = target_id.to_string();
        self.status_checks
            .run(target_id.to_string(), move || async move {
                let status: FlagStatus = api
                    .get(&format!("/api/follow/{}/status", segment(&target)))
                    .await?;
                state
                    .write()
                    .await
                    .known_status
                    .insert(target, status.active);
                Ok(status.active)
            })
            .await
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Follow `target_id`
    ///
    /// A synthetic edge appears immediately. On success the following
    /// list is refetched; on failure the synthetic edge is removed. A
    /// second call while the first is pending joins it.
    pub async fn follow_user(&self, target_id: &str) -> Result<()> {
        let me = self.validate_target(target_id).await?;

        let api = self.api.clone();
        let state = self.state.clone();
        let target = target_id.to_string();
        let me_for_request = me.clone();
        self.mutations
            .run((FollowOp::Follow, target_id.to_string()), move || async move {
                OptimisticMutation::new(&*state, "follow_user")
                    .run(
                        |s| {
                            if s.is_following(&target) {
                                None
                            } else {
                                let edge = FollowEdge::synthetic(&me_for_request, &target);
                                let id = edge.id.clone();
                                s.following.push(edge);
                                Some(id)
                            }
                        },
                        api.post_empty::<IgnoredAny>(&format!(
                            "/api/follow/{}",
                            segment(&target)
                        )),
                        |s, _| {
                            s.known_status.insert(target.clone(), true);
                        },
                        |s, added| {
                            if let Some(id) = added {
                                s.following.retain(|e| e.id != id);
                            }
                        },
                    )
                    .await?;
                Ok(true)
            })
            .await?;

        tracing::info!(target_id = %target_id, "Followed user");
        self.reconcile_following(&me, target_id).await;
        self.events.publish(StoreEvent::FollowChanged {
            target_id: target_id.to_string(),
            following: true,
        });
        Ok(())
    }

    /// Unfollow `target_id`
    ///
    /// Matching edges disappear immediately and are put back at their
    /// original positions if the request fails.
    pub async fn unfollow_user(&self, target_id: &str) -> Result<()> {
        let me = self.validate_target(target_id).await?;

        let api = self.api.clone();
        let state = self.state.clone();
        let target = target_id.to_string();
        self.mutations
            .run(
                (FollowOp::Unfollow, target_id.to_string()),
                move || async move {
                    OptimisticMutation::new(&*state, "unfollow_user")
                        .run(
                            |s| {
                                let mut removed = Vec::new();
                                let mut index = 0;
                                s.following.retain(|edge| {
                                    let keep = edge.following_id != target;
                                    if !keep {
                                        removed.push((index, edge.clone()));
                                    }
                                    index += 1;
                                    keep
                                });
                                removed
                            },
                            api.delete::<IgnoredAny>(&format!(
                                "/api/follow/{}",
                                segment(&target)
                            )),
                            |s, _| {
                                s.known_status.insert(target.clone(), false);
                            },
                            |s, removed| {
                                for (index, edge) in removed {
                                    let at = index.min(s.following.len());
                                    s.following.insert(at, edge);
                                }
                            },
                        )
                        .await?;
                    Ok(false)
                },
            )
            .await?;

        tracing::info!(target_id = %target_id, "Unfollowed user");
        self.reconcile_following(&me, target_id).await;
        self.events.publish(StoreEvent::FollowChanged {
            target_id: target_id.to_string(),
            following: false,
        });
        Ok(())
    }

    /// Forget everything (logout)
    pub async fn reset(&self) {
        *self.state.write().await = FollowState::default();
    }

    async fn validate_target(&self, target_id: &str) -> Result<String> {
        if target_id.trim().is_empty() || is_temp_id(target_id) {
            return Err(ClientError::Validation("Invalid user".to_string()));
        }
        let me = self.session.require_user_id().await?;
        if me == target_id {
            return Err(ClientError::Validation(
                "You cannot follow yourself".to_string(),
            ));
        }
        Ok(me)
    }

    /// Replace the following list with the server's after a mutation
    ///
    /// If the refetch fails, synthetic edges for `target_id` are promoted
    /// to confirmed ones since the mutation itself succeeded.
    async fn reconcile_following(&self, me: &str, target_id: &str) {
        if let Err(error) = self.fetch_following(me).await {
            tracing::warn!(%error, "Following refetch failed; keeping local list");
            let mut state = self.state.write().await;
            for edge in state.following.iter_mut() {
                if edge.following_id == target_id && edge.is_synthetic() {
                    *edge = FollowEdge::confirmed(me, target_id, edge.user.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_list_answers_following() {
        let mut state = FollowState::default();
        state
            .following
            .push(FollowEdge::confirmed("me", "them", None));
        assert!(state.is_following("them"));
        assert!(!state.is_following("other"));
    }
}
