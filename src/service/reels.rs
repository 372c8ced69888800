//! Reel feed
//!
//! Paged short-video feed with optimistic like/save counters.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, Page, PageRequest, segment};
use crate::data::{FlagStatus, Reel, is_temp_id};
use crate::error::{ClientError, Result};
use crate::metrics::{UPLOADS_TOTAL, UPLOAD_BYTES_TOTAL};
use crate::service::SessionStore;
use crate::state::{EventBus, InFlight, OptimisticMutation, RefreshHandle, StoreEvent, Watcher};

const MAX_CAPTION_LENGTH: usize = 2200;

/// Which reel flag a toggle flips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReelFlag {
    Like,
    Save,
}

impl ReelFlag {
    fn action(self) -> &'static str {
        match self {
            ReelFlag::Like => "like",
            ReelFlag::Save => "save",
        }
    }

    fn get(self, reel: &Reel) -> (bool, u64) {
        match self {
            ReelFlag::Like => (reel.is_liked, reel.likes_count),
            ReelFlag::Save => (reel.is_saved, reel.saves_count),
        }
    }

    fn set(self, reel: &mut Reel, active: bool, count: u64) {
        match self {
            ReelFlag::Like => {
                reel.is_liked = active;
                reel.likes_count = count;
            }
            ReelFlag::Save => {
                reel.is_saved = active;
                reel.saves_count = count;
            }
        }
    }
}

/// A video selected for upload
#[derive(Debug, Clone)]
pub struct ReelVideo {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct ReelState {
    items: Vec<Reel>,
    page: Option<PageRequest>,
    has_more: bool,
}

impl ReelState {
    fn reel_mut(&mut self, id: &str) -> Option<&mut Reel> {
        self.items.iter_mut().find(|r| r.id == id)
    }

    /// Append reels not already in the feed
    fn append(&mut self, reels: Vec<Reel>) -> usize {
        let known: HashSet<String> = self.items.iter().map(|r| r.id.clone()).collect();
        let before = self.items.len();
        self.items
            .extend(reels.into_iter().filter(|r| !known.contains(&r.id)));
        self.items.len() - before
    }
}

/// Reel feed store
pub struct ReelStore {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    events: EventBus,
    state: Arc<RwLock<ReelState>>,
    pages: InFlight<u32, Page<Reel>>,
    page_size: u32,
    max_upload_bytes: u64,
}

impl ReelStore {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionStore>,
        events: EventBus,
        page_size: u32,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            api,
            session,
            events,
            state: Arc::new(RwLock::new(ReelState::default())),
            pages: InFlight::new("reel_page"),
            page_size: page_size.max(1),
            max_upload_bytes,
        }
    }

    pub async fn reels(&self) -> Vec<Reel> {
        self.state.read().await.items.clone()
    }

    pub async fn has_more(&self) -> bool {
        self.state.read().await.has_more
    }

    /// Load the first page; with `reset` the current feed is replaced,
    /// otherwise new reels are merged in
    pub async fn fetch_feed(&self, reset: bool) -> Result<Vec<Reel>> {
        let request = PageRequest::first(self.page_size);
        let page = self.fetch_page(request).await?;

        let count = {
            let mut state = self.state.write().await;
            if reset || state.page.is_none() {
                state.page = Some(page.request());
                state.has_more = page.has_more();
                state.items = page.items;
            } else {
                merge_latest(&mut state.items, page.items);
            }
            state.items.len()
        };

        self.events.publish(StoreEvent::ReelsUpdated { items: count });
        Ok(self.reels().await)
    }

    /// Load the next page; returns how many reels were added
    pub async fn load_more(&self) -> Result<usize> {
        let request = {
            let state = self.state.read().await;
            match state.page {
                Some(page) if state.has_more => page.next(),
                Some(_) => return Ok(0),
                None => PageRequest::first(self.page_size),
            }
        };

        let page = self.fetch_page(request).await?;
        let (added, count) = {
            let mut state = self.state.write().await;
            // A concurrent caller already applied this page
            if state.page.is_some_and(|p| p.page >= page.page) {
                return Ok(0);
            }
            state.page = Some(page.request());
            state.has_more = page.has_more();
            let added = state.append(page.items);
            (added, state.items.len())
        };

        if added > 0 {
            self.events.publish(StoreEvent::ReelsUpdated { items: count });
        }
        Ok(added)
    }

    pub async fn toggle_like(&self, reel_id: &str) -> Result<bool> {
        self.toggle(ReelFlag::Like, reel_id).await
    }

    pub async fn toggle_save(&self, reel_id: &str) -> Result<bool> {
        self.toggle(ReelFlag::Save, reel_id).await
    }

    /// Upload a video; the new reel goes to the top of the feed
    pub async fn upload_reel(&self, video: ReelVideo, caption: &str) -> Result<Reel> {
        self.session.require_user_id().await?;
        if !video.content_type.starts_with("video/") {
            return Err(ClientError::Validation(
                "Only video files can be uploaded as reels".to_string(),
            ));
        }
        if video.bytes.is_empty() {
            return Err(ClientError::Validation("File is empty".to_string()));
        }
        let size = video.bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(ClientError::Validation(format!(
                "File exceeds the {} MB limit",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }
        if caption.chars().count() > MAX_CAPTION_LENGTH {
            return Err(ClientError::Validation("Caption is too long".to_string()));
        }

        let part = Part::bytes(video.bytes)
            .file_name(video.file_name.clone())
            .mime_str(&video.content_type)?;
        let form = Form::new()
            .part("video", part)
            .text("caption", caption.to_string());

        let reel: Reel = match self.api.post_multipart("/api/reels", form).await {
            Ok(reel) => reel,
            Err(error) => {
                UPLOADS_TOTAL.with_label_values(&["reel", "error"]).inc();
                return Err(error);
            }
        };
        UPLOADS_TOTAL.with_label_values(&["reel", "success"]).inc();
        UPLOAD_BYTES_TOTAL.inc_by(size);

        let count = {
            let mut state = self.state.write().await;
            state.items.retain(|r| r.id != reel.id);
            state.items.insert(0, reel.clone());
            state.items.len()
        };
        tracing::info!(reel_id = %reel.id, file = %video.file_name, "Reel uploaded");
        self.events.publish(StoreEvent::ReelsUpdated { items: count });
        Ok(reel)
    }

    /// Count a view; failures are only logged
    pub async fn record_view(&self, reel_id: &str) {
        if is_temp_id(reel_id) {
            return;
        }
        let path = format!("/api/reels/{}/view", segment(reel_id));
        match self.api.post_empty::<IgnoredAny>(&path).await {
            Ok(_) => {
                if let Some(reel) = self.state.write().await.reel_mut(reel_id) {
                    reel.views_count += 1;
                }
            }
            Err(error) => {
                tracing::debug!(reel_id = %reel_id, %error, "View not recorded");
            }
        }
    }

    /// Merge the newest page into the feed
    pub async fn refresh(&self) -> Result<()> {
        if !self.session.is_authenticated().await {
            return Ok(());
        }
        self.fetch_feed(false).await.map(|_| ())
    }

    /// Keep the feed current: server events when available, otherwise
    /// every `interval`
    pub fn watch(self: &Arc<Self>, interval: Duration, push_enabled: bool) -> RefreshHandle {
        let store = Arc::clone(self);
        Watcher {
            name: "reels",
            events_path: "/api/events?topic=reels".to_string(),
            topics: vec!["reel"],
            interval,
            push_enabled,
        }
        .spawn(self.api.clone(), move || {
            let store = store.clone();
            async move { store.refresh().await }
        })
    }

    /// Forget everything (logout)
    pub async fn reset(&self) {
        *self.state.write().await = ReelState::default();
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page<Reel>> {
        let api = self.api.clone();
        self.pages
            .run(request.page, move || async move {
                api.get_page("/api/reels", request, &[]).await
            })
            .await
    }

    async fn toggle(&self, flag: ReelFlag, reel_id: &str) -> Result<bool> {
        if reel_id.trim().is_empty() || is_temp_id(reel_id) {
            return Err(ClientError::Validation("Invalid reel".to_string()));
        }
        self.session.require_user_id().await?;

        let path = format!("/api/reels/{}/{}", segment(reel_id), flag.action());
        let status = OptimisticMutation::new(&*self.state, "toggle_reel")
            .run(
                |s| {
                    s.reel_mut(reel_id).map(|reel| {
                        let (active, count) = flag.get(reel);
                        let next = if active {
                            count.saturating_sub(1)
                        } else {
                            count + 1
                        };
                        flag.set(reel, !active, next);
                        (active, count)
                    })
                },
                self.api.post_empty::<FlagStatus>(&path),
                |s, status| {
                    if let Some(reel) = s.reel_mut(reel_id) {
                        let (_, count) = flag.get(reel);
                        flag.set(reel, status.active, status.count.unwrap_or(count));
                    }
                },
                |s, previous| {
                    if let (Some((active, count)), Some(reel)) = (previous, s.reel_mut(reel_id)) {
                        flag.set(reel, active, count);
                    }
                },
            )
            .await?;
        Ok(status.active)
    }
}

/// Update known reels in place and put unseen ones on top
fn merge_latest(items: &mut Vec<Reel>, latest: Vec<Reel>) {
    let mut fresh = Vec::new();
    for reel in latest {
        match items.iter_mut().find(|r| r.id == reel.id) {
            Some(existing) => *existing = reel,
            None => fresh.push(reel),
        }
    }
    if !fresh.is_empty() {
        items.splice(0..0, fresh);
    }
}
