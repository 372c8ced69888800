//! Like/favorite service
//!
//! Two flat maps (image id -> bool). Entries are filled by status
//! checks or toggles and live until logout.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api::{ApiClient, Page, PageRequest, segment};
use crate::data::{FlagStatus, Image, is_temp_id};
use crate::error::{ClientError, Result};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE};
use crate::state::{EventBus, InFlight, InteractionKind, OptimisticMutation, StoreEvent};

impl InteractionKind {
    fn resource(self) -> &'static str {
        match self {
            InteractionKind::Like => "likes",
            InteractionKind::Favorite => "favorites",
        }
    }

    fn cache_name(self) -> &'static str {
        match self {
            InteractionKind::Like => "like_status",
            InteractionKind::Favorite => "favorite_status",
        }
    }
}

#[derive(Default)]
struct InteractionState {
    liked: HashMap<String, bool>,
    favorited: HashMap<String, bool>,
    /// Last counter reported by a toggle, by image id
    counts: HashMap<(InteractionKind, String), u64>,
}

impl InteractionState {
    fn map_mut(&mut self, kind: InteractionKind) -> &mut HashMap<String, bool> {
        match kind {
            InteractionKind::Like => &mut self.liked,
            InteractionKind::Favorite => &mut self.favorited,
        }
    }

    fn map(&self, kind: InteractionKind) -> &HashMap<String, bool> {
        match kind {
            InteractionKind::Like => &self.liked,
            InteractionKind::Favorite => &self.favorited,
        }
    }
}

/// Interaction-status store
pub struct InteractionStore {
    api: Arc<ApiClient>,
    events: EventBus,
    state: Arc<RwLock<InteractionState>>,
    toggles: InFlight<(InteractionKind, String), bool>,
    checks: InFlight<(InteractionKind, String), bool>,
}

impl InteractionStore {
    pub fn new(api: Arc<ApiClient>, events: EventBus) -> Self {
        Self {
            api,
            events,
            state: Arc::new(RwLock::new(InteractionState::default())),
            toggles: InFlight::new("interaction_toggle"),
            checks: InFlight::new("interaction_status"),
        }
    }

    pub async fn toggle_like(&self, image_id: &str) -> Result<bool> {
        self.toggle(InteractionKind::Like, image_id).await
    }

    pub async fn toggle_favorite(&self, image_id: &str) -> Result<bool> {
        self.toggle(InteractionKind::Favorite, image_id).await
    }

    pub async fn check_like_status(&self, image_id: &str) -> Result<bool> {
        self.check(InteractionKind::Like, image_id).await
    }

    pub async fn check_favorite_status(&self, image_id: &str) -> Result<bool> {
        self.check(InteractionKind::Favorite, image_id).await
    }

    /// Cached flag without any request
    pub async fn cached(&self, kind: InteractionKind, image_id: &str) -> Option<bool> {
        self.state.read().await.map(kind).get(image_id).copied()
    }

    /// Last count reported by the backend for this image, if any
    pub async fn cached_count(&self, kind: InteractionKind, image_id: &str) -> Option<u64> {
        self.state
            .read()
            .await
            .counts
            .get(&(kind, image_id.to_string()))
            .copied()
    }

    /// Images the signed-in user liked; seeds the like map
    pub async fn liked_images(&self, request: PageRequest) -> Result<Page<Image>> {
        self.listing(InteractionKind::Like, request).await
    }

    /// Images the signed-in user favorited; seeds the favorite map
    pub async fn favorite_images(&self, request: PageRequest) -> Result<Page<Image>> {
        self.listing(InteractionKind::Favorite, request).await
    }

    /// Forget everything (logout)
    pub async fn reset(&self) {
        *self.state.write().await = InteractionState::default();
        CACHE_SIZE.with_label_values(&["like_status"]).set(0);
        CACHE_SIZE.with_label_values(&["favorite_status"]).set(0);
    }

    /// Flip the flag now, confirm with the backend, flip back on failure
    async fn toggle(&self, kind: InteractionKind, image_id: &str) -> Result<bool> {
        validate_image_id(image_id)?;

        let api = self.api.clone();
        let state = self.state.clone();
        let id = image_id.to_string();
        let active = self
            .toggles
            .run((kind, image_id.to_string()), move || async move {
                let path = format!("/api/{}/{}/toggle", kind.resource(), segment(&id));
                let status = OptimisticMutation::new(&*state, "toggle_interaction")
                    .run(
                        |s| {
                            let map = s.map_mut(kind);
                            let previous = map.get(&id).copied();
                            map.insert(id.clone(), !previous.unwrap_or(false));
                            previous
                        },
                        api.post_empty::<FlagStatus>(&path),
                        |s, status| {
                            s.map_mut(kind).insert(id.clone(), status.active);
                            if let Some(count) = status.count {
                                s.counts.insert((kind, id.clone()), count);
                            }
                        },
                        |s, previous| {
                            let map = s.map_mut(kind);
                            match previous {
                                Some(value) => {
                                    map.insert(id.clone(), value);
                                }
                                None => {
                                    map.remove(&id);
                                }
                            }
                        },
                    )
                    .await?;
                Ok(status.active)
            })
            .await?;

        self.update_size_metric(kind).await;
        self.events.publish(StoreEvent::InteractionChanged {
            image_id: image_id.to_string(),
            kind,
            active,
        });
        Ok(active)
    }

    /// Memoized status read; only the first call per image hits the network
    async fn check(&self, kind: InteractionKind, image_id: &str) -> Result<bool> {
        validate_image_id(image_id)?;

        if let Some(active) = self.cached(kind, image_id).await {
            CACHE_HITS_TOTAL.with_label_values(&[kind.cache_name()]).inc();
            return Ok(active);
        }
        CACHE_MISSES_TOTAL
            .with_label_values(&[kind.cache_name()])
            .inc();

        let api = self.api.clone();
        let state = self.state.clone();
        let id = image_id.to_string();
        let active = self
            .checks
            .run((kind, image_id.to_string()), move || async move {
                let status: FlagStatus = api
                    .get(&format!("/api/{}/{}/status", kind.resource(), segment(&id)))
                    .await?;
                // A toggle that landed meanwhile is newer than this read
                state
                    .write()
                    .await
                    .map_mut(kind)
                    .entry(id)
                    .or_insert(status.active);
                Ok(status.active)
            })
            .await?;

        self.update_size_metric(kind).await;
        Ok(self.cached(kind, image_id).await.unwrap_or(active))
    }

    async fn listing(&self, kind: InteractionKind, request: PageRequest) -> Result<Page<Image>> {
        let page: Page<Image> = self
            .api
            .get_page(&format!("/api/{}/me/images", kind.resource()), request, &[])
            .await?;

        {
            let mut state = self.state.write().await;
            let map = state.map_mut(kind);
            for image in &page.items {
                map.insert(image.id.clone(), true);
            }
        }
        self.update_size_metric(kind).await;
        Ok(page)
    }

    async fn update_size_metric(&self, kind: InteractionKind) {
        let size = self.state.read().await.map(kind).len();
        CACHE_SIZE
            .with_label_values(&[kind.cache_name()])
            .set(size as i64);
    }
}

fn validate_image_id(image_id: &str) -> Result<()> {
    if image_id.trim().is_empty() || is_temp_id(image_id) {
        return Err(ClientError::Validation("Invalid image".to_string()));
    }
    Ok(())
}
