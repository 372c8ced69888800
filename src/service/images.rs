//! Image service
//!
//! Feed listing, single image reads and owner edits. The loaded feed is
//! kept locally so edits and deletes show up without a refetch.

use std::sync::Arc;

use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, Page, PageRequest, segment};
use crate::data::{Image, ImagePatch, is_temp_id};
use crate::error::{ClientError, Result};
use crate::state::OptimisticMutation;

#[derive(Default)]
struct FeedState {
    images: Vec<Image>,
    page: Option<PageRequest>,
    has_more: bool,
}

pub struct ImageService {
    api: Arc<ApiClient>,
    state: RwLock<FeedState>,
}

impl ImageService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            state: RwLock::new(FeedState::default()),
        }
    }

    /// Images loaded so far, in feed order
    pub async fn images(&self) -> Vec<Image> {
        self.state.read().await.images.clone()
    }

    pub async fn has_more(&self) -> bool {
        self.state.read().await.has_more
    }

    /// Load a feed page; page 1 replaces the local feed, later pages
    /// extend it
    pub async fn feed(&self, request: PageRequest) -> Result<Page<Image>> {
        let page: Page<Image> = self.api.get_page("/api/images", request, &[]).await?;

        let mut state = self.state.write().await;
        if request.page <= 1 {
            state.images = page.items.clone();
        } else {
            for image in &page.items {
                if !state.images.iter().any(|i| i.id == image.id) {
                    state.images.push(image.clone());
                }
            }
        }
        state.page = Some(page.request());
        state.has_more = page.has_more();
        Ok(page)
    }

    /// Next feed page after the last one loaded
    pub async fn load_more(&self) -> Result<Option<Page<Image>>> {
        let request = {
            let state = self.state.read().await;
            match state.page {
                Some(page) if state.has_more => page.next(),
                _ => return Ok(None),
            }
        };
        self.feed(request).await.map(Some)
    }

    pub async fn get_image(&self, image_id: &str) -> Result<Image> {
        validate_id(image_id)?;
        self.api
            .get(&format!("/api/images/{}", segment(image_id)))
            .await
    }

    pub async fn user_images(&self, user_id: &str, request: PageRequest) -> Result<Page<Image>> {
        self.api
            .get_page(
                &format!("/api/images/user/{}", segment(user_id)),
                request,
                &[],
            )
            .await
    }

    /// Images similar to `image_id`
    pub async fn related(&self, image_id: &str) -> Result<Vec<Image>> {
        validate_id(image_id)?;
        self.api
            .get(&format!("/api/images/{}/related", segment(image_id)))
            .await
    }

    /// Edit an image's metadata; the local copy is replaced with the
    /// server's answer
    pub async fn update_image(&self, image_id: &str, patch: &ImagePatch) -> Result<Image> {
        validate_id(image_id)?;
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ClientError::Validation("Title is required".to_string()));
        }

        let image: Image = self
            .api
            .put(&format!("/api/images/{}", segment(image_id)), patch)
            .await?;

        if let Some(local) = self
            .state
            .write()
            .await
            .images
            .iter_mut()
            .find(|i| i.id == image.id)
        {
            *local = image.clone();
        }
        tracing::info!(image_id = %image_id, "Image updated");
        Ok(image)
    }

    /// Delete an image; it leaves the local feed immediately
    pub async fn delete_image(&self, image_id: &str) -> Result<()> {
        validate_id(image_id)?;

        let path = format!("/api/images/{}", segment(image_id));
        OptimisticMutation::new(&self.state, "delete_image")
            .run(
                |s| {
                    let index = s.images.iter().position(|i| i.id == image_id)?;
                    Some((index, s.images.remove(index)))
                },
                self.api.delete::<IgnoredAny>(&path),
                |_, _| {},
                |s, removed| {
                    if let Some((index, image)) = removed {
                        let at = index.min(s.images.len());
                        s.images.insert(at, image);
                    }
                },
            )
            .await?;

        tracing::info!(image_id = %image_id, "Image deleted");
        Ok(())
    }

    pub async fn reset(&self) {
        *self.state.write().await = FeedState::default();
    }
}

fn validate_id(image_id: &str) -> Result<()> {
    if image_id.trim().is_empty() || is_temp_id(image_id) {
        return Err(ClientError::Validation("Invalid image".to_string()));
    }
    Ok(())
}
