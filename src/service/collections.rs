//! Collection service

use std::sync::Arc;

use serde::Serialize;
use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, segment};
use crate::data::{Collection, CollectionDraft, ImageRef, is_temp_id};
use crate::error::{ClientError, Result};
use crate::service::SessionStore;
use crate::state::OptimisticMutation;

const MAX_NAME_LENGTH: usize = 100;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageAddition<'a> {
    image_id: &'a str,
}

#[derive(Default)]
struct CollectionState {
    /// Collections of the last user listed
    owner: Option<String>,
    items: Vec<Collection>,
}

impl CollectionState {
    fn get_mut(&mut self, id: &str) -> Option<&mut Collection> {
        self.items.iter_mut().find(|c| c.id == id)
    }
}

/// Collections of one user, kept in sync with edits
pub struct CollectionService {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    state: RwLock<CollectionState>,
}

impl CollectionService {
    pub fn new(api: Arc<ApiClient>, session: Arc<SessionStore>) -> Self {
        Self {
            api,
            session,
            state: RwLock::new(CollectionState::default()),
        }
    }

    pub async fn collections(&self) -> Vec<Collection> {
        self.state.read().await.items.clone()
    }

    /// Collections owned by `user_id`; becomes the local list
    pub async fn list(&self, user_id: &str) -> Result<Vec<Collection>> {
        let collections: Vec<Collection> = self
            .api
            .get(&format!("/api/collections/user/{}", segment(user_id)))
            .await?;

        let mut state = self.state.write().await;
        state.owner = Some(user_id.to_string());
        state.items = collections.clone();
        Ok(collections)
    }

    pub async fn get(&self, collection_id: &str) -> Result<Collection> {
        validate_id(collection_id)?;
        let collection: Collection = self
            .api
            .get(&format!("/api/collections/{}", segment(collection_id)))
            .await?;

        if let Some(local) = self.state.write().await.get_mut(&collection.id) {
            *local = collection.clone();
        }
        Ok(collection)
    }

    pub async fn create(&self, draft: &CollectionDraft) -> Result<Collection> {
        let me = self.session.require_user_id().await?;
        validate_draft(draft)?;

        let collection: Collection = self.api.post("/api/collections", draft).await?;

        let mut state = self.state.write().await;
        if state.owner.as_deref() == Some(me.as_str()) {
            state.items.insert(0, collection.clone());
        }
        tracing::info!(collection_id = %collection.id, "Collection created");
        Ok(collection)
    }

    pub async fn update(&self, collection_id: &str, draft: &CollectionDraft) -> Result<Collection> {
        validate_id(collection_id)?;
        validate_draft(draft)?;

        let collection: Collection = self
            .api
            .put(&format!("/api/collections/{}", segment(collection_id)), draft)
            .await?;

        if let Some(local) = self.state.write().await.get_mut(collection_id) {
            *local = collection.clone();
        }
        Ok(collection)
    }

    /// Delete a collection; it leaves the local list immediately
    pub async fn delete(&self, collection_id: &str) -> Result<()> {
        validate_id(collection_id)?;

        let path = format!("/api/collections/{}", segment(collection_id));
        OptimisticMutation::new(&self.state, "delete_collection")
            .run(
                |s| {
                    let index = s.items.iter().position(|c| c.id == collection_id)?;
                    Some((index, s.items.remove(index)))
                },
                self.api.delete::<IgnoredAny>(&path),
                |_, _| {},
                |s, removed| {
                    if let Some((index, collection)) = removed {
                        let at = index.min(s.items.len());
                        s.items.insert(at, collection);
                    }
                },
            )
            .await?;
        Ok(())
    }

    pub async fn add_image(&self, collection_id: &str, image_id: &str) -> Result<()> {
        validate_id(collection_id)?;
        validate_id(image_id)?;

        let path = format!("/api/collections/{}/images", segment(collection_id));
        let body = ImageAddition { image_id };
        OptimisticMutation::new(&self.state, "collection_add_image")
            .run(
                |s| match s.get_mut(collection_id) {
                    Some(c) if !c.contains(image_id) => {
                        c.images.push(ImageRef::Id(image_id.to_string()));
                        c.image_count += 1;
                        true
                    }
                    _ => false,
                },
                self.api.post::<_, IgnoredAny>(&path, &body),
                |_, _| {},
                |s, added| {
                    if let (true, Some(c)) = (added, s.get_mut(collection_id)) {
                        c.images.retain(|i| i.id() != image_id);
                        c.image_count = c.image_count.saturating_sub(1);
                    }
                },
            )
            .await?;
        Ok(())
    }

    pub async fn remove_image(&self, collection_id: &str, image_id: &str) -> Result<()> {
        validate_id(collection_id)?;
        validate_id(image_id)?;

        let path = format!(
            "/api/collections/{}/images/{}",
            segment(collection_id),
            segment(image_id)
        );
        OptimisticMutation::new(&self.state, "collection_remove_image")
            .run(
                |s| {
                    let c = s.get_mut(collection_id)?;
                    let index = c.images.iter().position(|i| i.id() == image_id)?;
                    let removed = c.images.remove(index);
                    c.image_count = c.image_count.saturating_sub(1);
                    Some((index, removed))
                },
                self.api.delete::<IgnoredAny>(&path),
                |_, _| {},
                |s, removed| {
                    if let (Some((index, image)), Some(c)) = (removed, s.get_mut(collection_id)) {
                        let at = index.min(c.images.len());
                        c.images.insert(at, image);
                        c.image_count += 1;
                    }
                },
            )
            .await?;
        Ok(())
    }

    pub async fn reset(&self) {
        *self.state.write().await = CollectionState::default();
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() || is_temp_id(id) {
        return Err(ClientError::Validation("Invalid id".to_string()));
    }
    Ok(())
}

fn validate_draft(draft: &CollectionDraft) -> Result<()> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ClientError::Validation("Collection name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ClientError::Validation(format!(
            "Collection name cannot exceed {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_needs_a_name() {
        let mut draft = CollectionDraft::default();
        assert!(validate_draft(&draft).is_err());
        draft.name = "Favourites".to_string();
        assert!(validate_draft(&draft).is_ok());
        draft.name = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(validate_draft(&draft).is_err());
    }
}
