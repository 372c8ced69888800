//! Upload workflow
//!
//! A linear four-step flow. Files go to temporary storage as soon as they
//! are added; publishing commits metadata that references each temporary
//! upload by its `public_id`.
//!
//! ```text
//! SelectFiles -> EnterDetails -> PublishingSettings -> Complete
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::IgnoredAny;
use tokio::sync::RwLock;

use crate::api::{ApiClient, segment};
use crate::config::UploadConfig;
use crate::data::{Image, TempUpload, Visibility, new_temp_id};
use crate::error::{ClientError, Result};
use crate::metrics::{UPLOADS_TOTAL, UPLOAD_BYTES_TOTAL};
use crate::service::{CollectionService, SessionStore};
use crate::state::{EventBus, StoreEvent};

/// Where the workflow is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStep {
    #[default]
    SelectFiles,
    EnterDetails,
    PublishingSettings,
    Complete,
}

impl UploadStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectFiles => "select_files",
            Self::EnterDetails => "enter_details",
            Self::PublishingSettings => "publishing_settings",
            Self::Complete => "complete",
        }
    }

    fn previous(self) -> Option<Self> {
        match self {
            Self::EnterDetails => Some(Self::SelectFiles),
            Self::PublishingSettings => Some(Self::EnterDetails),
            Self::SelectFiles | Self::Complete => None,
        }
    }
}

/// A file selected in the workflow
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Local id, stable for the life of the workflow
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    /// Set once the temporary upload succeeded
    pub public_id: Option<String>,
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 0 while uploading, 100 when stored
    pub progress: u8,
    pub error: Option<String>,
    /// Id of the published image once committed
    pub image_id: Option<String>,
    bytes: Arc<[u8]>,
}

impl UploadFile {
    pub fn is_uploaded(&self) -> bool {
        self.public_id.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.public_id.is_none() && self.error.is_none()
    }
}

/// Metadata entered in the details and settings steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadDetails {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub license: Option<String>,
    pub visibility: Visibility,
    /// Collection to add the published images to
    pub collection_id: Option<String>,
}

/// Read-only view of the workflow
#[derive(Debug, Clone)]
pub struct UploadSnapshot {
    pub step: UploadStep,
    pub files: Vec<UploadFile>,
    pub details: UploadDetails,
    pub error: Option<String>,
    pub published: Vec<Image>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageCommit<'a> {
    public_id: &'a str,
    url: &'a str,
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    license: Option<&'a str>,
    visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

#[derive(Default)]
struct UploadState {
    step: UploadStep,
    files: Vec<UploadFile>,
    details: UploadDetails,
    error: Option<String>,
    published: Vec<Image>,
    publishing: bool,
    /// (collection, image) pairs already stored by an earlier attempt
    collected: HashSet<(String, String)>,
}

impl UploadState {
    fn file_mut(&mut self, id: &str) -> Option<&mut UploadFile> {
        self.files.iter_mut().find(|f| f.id == id)
    }

    /// Reason the current step cannot be left, if any
    fn blocker(&self) -> Option<String> {
        match self.step {
            UploadStep::SelectFiles => {
                if self.files.is_empty() {
                    Some("Please select at least one image".to_string())
                } else if let Some(file) = self.files.iter().find(|f| f.error.is_some()) {
                    Some(format!("Remove or retry {} before continuing", file.file_name))
                } else if self.files.iter().any(UploadFile::is_pending) {
                    Some("Please wait for uploads to finish".to_string())
                } else {
                    None
                }
            }
            UploadStep::EnterDetails => {
                if self.details.title.trim().is_empty() {
                    Some("Title is required".to_string())
                } else if self.details.description.trim().is_empty() {
                    Some("Description is required".to_string())
                } else {
                    None
                }
            }
            UploadStep::PublishingSettings => Some("Publish to finish the upload".to_string()),
            UploadStep::Complete => Some("Upload already complete".to_string()),
        }
    }

    /// Temporary uploads not yet committed as images
    fn uncommitted(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.image_id.is_none())
            .filter_map(|f| f.public_id.clone())
            .collect()
    }
}

/// One upload session
pub struct UploadWorkflow {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    collections: Arc<CollectionService>,
    events: EventBus,
    state: RwLock<UploadState>,
    max_files: usize,
    max_file_bytes: u64,
}

impl UploadWorkflow {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionStore>,
        collections: Arc<CollectionService>,
        events: EventBus,
        config: &UploadConfig,
    ) -> Self {
        Self {
            api,
            session,
            collections,
            events,
            state: RwLock::new(UploadState::default()),
            max_files: config.max_files,
            max_file_bytes: config.max_file_bytes,
        }
    }

    pub async fn snapshot(&self) -> UploadSnapshot {
        let state = self.state.read().await;
        UploadSnapshot {
            step: state.step,
            files: state.files.clone(),
            details: state.details.clone(),
            error: state.error.clone(),
            published: state.published.clone(),
        }
    }

    pub async fn step(&self) -> UploadStep {
        self.state.read().await.step
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Add a file and upload it to temporary storage right away
    ///
    /// Returns the file's local id. A rejected file is not added; a failed
    /// upload keeps the file with its error set, which blocks the next
    /// step until it is retried or removed.
    pub async fn add_file(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        self.session.require_user_id().await?;

        let file = {
            let mut state = self.state.write().await;
            if state.step != UploadStep::SelectFiles {
                return Err(ClientError::Validation(
                    "Files can only be added in the first step".to_string(),
                ));
            }
            if let Err(error) = self.check_file(&state, content_type, bytes.len() as u64) {
                state.error = Some(error.user_message());
                return Err(error);
            }

            let file = UploadFile {
                id: new_temp_id(),
                file_name: file_name.to_string(),
                content_type: content_type.to_string(),
                size: bytes.len() as u64,
                public_id: None,
                url: None,
                width: None,
                height: None,
                progress: 0,
                error: None,
                image_id: None,
                bytes: bytes.into(),
            };
            state.files.push(file.clone());
            state.error = None;
            file
        };

        self.upload_temp(&file).await?;
        Ok(file.id)
    }

    /// Upload a failed file again
    pub async fn retry_file(&self, file_id: &str) -> Result<()> {
        let file = {
            let mut state = self.state.write().await;
            let file = state
                .file_mut(file_id)
                .ok_or(ClientError::NotFound)?;
            if file.error.is_none() {
                return Ok(());
            }
            file.error = None;
            file.progress = 0;
            file.clone()
        };
        self.upload_temp(&file).await
    }

    /// Remove a file; its temporary upload is deleted best-effort
    pub async fn remove_file(&self, index: usize) -> Result<UploadFile> {
        let removed = {
            let mut state = self.state.write().await;
            if state.step == UploadStep::Complete {
                return Err(ClientError::Validation("Upload already complete".to_string()));
            }
            if index >= state.files.len() {
                return Err(ClientError::NotFound);
            }
            let removed = state.files.remove(index);
            if state.files.iter().all(|f| f.error.is_none()) {
                state.error = None;
            }
            removed
        };

        if let (Some(public_id), None) = (&removed.public_id, &removed.image_id) {
            self.discard_temp(public_id).await;
        }
        Ok(removed)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Edit the metadata in place
    pub async fn update_details(&self, edit: impl FnOnce(&mut UploadDetails)) {
        let mut state = self.state.write().await;
        edit(&mut state.details);
        state.error = None;
    }

    /// Advance one step if the current step's requirements are met
    ///
    /// On failure the step is unchanged and the reason is kept in
    /// [`UploadSnapshot::error`].
    pub async fn next_step(&self) -> Result<UploadStep> {
        let step = {
            let mut state = self.state.write().await;
            if let Some(reason) = state.blocker() {
                state.error = Some(reason.clone());
                return Err(ClientError::Validation(reason));
            }
            state.step = match state.step {
                UploadStep::SelectFiles => UploadStep::EnterDetails,
                UploadStep::EnterDetails => UploadStep::PublishingSettings,
                other => other,
            };
            state.error = None;
            state.step
        };

        self.events.publish(StoreEvent::UploadStepChanged {
            step: step.as_str(),
        });
        Ok(step)
    }

    /// Go back one step; not possible once complete
    pub async fn previous_step(&self) -> Result<UploadStep> {
        let step = {
            let mut state = self.state.write().await;
            if state.publishing {
                return Err(ClientError::Validation("Publishing in progress".to_string()));
            }
            let previous = state.step.previous().ok_or_else(|| {
                ClientError::Validation("Cannot go back from this step".to_string())
            })?;
            state.step = previous;
            state.error = None;
            previous
        };

        self.events.publish(StoreEvent::UploadStepChanged {
            step: step.as_str(),
        });
        Ok(step)
    }

    /// Commit every uploaded file as an image
    ///
    /// Files already committed by an earlier attempt are skipped. Any
    /// failure keeps the workflow on the settings step with the error set.
    pub async fn publish(&self) -> Result<Vec<Image>> {
        let (files, details) = {
            let mut state = self.state.write().await;
            if state.step != UploadStep::PublishingSettings {
                return Err(ClientError::Validation(
                    "Finish the previous steps first".to_string(),
                ));
            }
            if state.publishing {
                return Err(ClientError::Validation("Publishing in progress".to_string()));
            }
            // Files and details may have changed since their steps were left
            let reason = if state.files.is_empty() {
                Some("Please select at least one image".to_string())
            } else if let Some(file) = state.files.iter().find(|f| !f.is_uploaded()) {
                Some(format!("{} has not finished uploading", file.file_name))
            } else if state.details.title.trim().is_empty()
                || state.details.description.trim().is_empty()
            {
                Some("Title and description are required".to_string())
            } else {
                None
            };
            if let Some(reason) = reason {
                state.error = Some(reason.clone());
                return Err(ClientError::Validation(reason));
            }
            state.publishing = true;
            state.error = None;
            (state.files.clone(), state.details.clone())
        };

        let result = self.commit_all(&files, &details).await;

        let mut state = self.state.write().await;
        state.publishing = false;
        match result {
            Ok(images) => {
                state.published = images.clone();
                state.step = UploadStep::Complete;
                drop(state);
                tracing::info!(count = images.len(), "Upload published");
                self.events.publish(StoreEvent::UploadStepChanged {
                    step: UploadStep::Complete.as_str(),
                });
                Ok(images)
            }
            Err(error) => {
                state.error = Some(error.user_message());
                Err(error)
            }
        }
    }

    /// Start over; uncommitted temporary uploads are deleted best-effort
    pub async fn reset(&self) {
        let leftovers = {
            let mut state = self.state.write().await;
            let leftovers = if state.step == UploadStep::Complete {
                Vec::new()
            } else {
                state.uncommitted()
            };
            *state = UploadState::default();
            leftovers
        };

        for public_id in leftovers {
            self.discard_temp(&public_id).await;
        }
        self.events.publish(StoreEvent::UploadStepChanged {
            step: UploadStep::SelectFiles.as_str(),
        });
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_file(&self, state: &UploadState, content_type: &str, size: u64) -> Result<()> {
        if !content_type.starts_with("image/") {
            return Err(ClientError::Validation("Only image files are allowed".to_string()));
        }
        if size == 0 {
            return Err(ClientError::Validation("File is empty".to_string()));
        }
        if size > self.max_file_bytes {
            return Err(ClientError::Validation(format!(
                "File exceeds the {} MB limit",
                self.max_file_bytes / (1024 * 1024)
            )));
        }
        if state.files.len() >= self.max_files {
            return Err(ClientError::Validation(format!(
                "You can upload up to {} images at once",
                self.max_files
            )));
        }
        Ok(())
    }

    async fn upload_temp(&self, file: &UploadFile) -> Result<()> {
        let part = Part::bytes(file.bytes.to_vec())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)?;
        let form = Form::new().part("image", part);

        let result: Result<TempUpload> = self.api.post_multipart("/api/images/temp", form).await;

        let mut state = self.state.write().await;
        match result {
            Ok(temp) => {
                UPLOADS_TOTAL.with_label_values(&["temp", "success"]).inc();
                UPLOAD_BYTES_TOTAL.inc_by(file.size);
                let Some(entry) = state.file_mut(&file.id) else {
                    // Removed while uploading
                    drop(state);
                    self.discard_temp(&temp.public_id).await;
                    return Ok(());
                };
                entry.public_id = Some(temp.public_id);
                entry.url = Some(temp.url);
                entry.width = temp.width;
                entry.height = temp.height;
                entry.progress = 100;
                entry.error = None;
                tracing::debug!(file = %file.file_name, "Temporary upload stored");
                Ok(())
            }
            Err(error) => {
                UPLOADS_TOTAL.with_label_values(&["temp", "error"]).inc();
                tracing::warn!(file = %file.file_name, %error, "Temporary upload failed");
                if let Some(entry) = state.file_mut(&file.id) {
                    entry.error = Some(error.user_message());
                    entry.progress = 0;
                }
                Err(error)
            }
        }
    }

    async fn discard_temp(&self, public_id: &str) {
        let path = format!("/api/images/temp/{}", segment(public_id));
        if let Err(error) = self.api.delete::<IgnoredAny>(&path).await {
            tracing::debug!(public_id = %public_id, %error, "Temporary upload not deleted");
        }
    }

    async fn commit_all(&self, files: &[UploadFile], details: &UploadDetails) -> Result<Vec<Image>> {
        let mut images = Vec::with_capacity(files.len());

        for file in files {
            let public_id = file.public_id.as_deref().ok_or_else(|| {
                ClientError::Validation(format!("{} has not finished uploading", file.file_name))
            })?;

            if let Some(image_id) = &file.image_id {
                let image: Image = self
                    .api
                    .get(&format!("/api/images/{}", segment(image_id)))
                    .await?;
                images.push(image);
                continue;
            }

            let commit = ImageCommit {
                public_id,
                url: file.url.as_deref().unwrap_or_default(),
                title: details.title.trim(),
                description: details.description.trim(),
                tags: &details.tags,
                category: details.category.as_deref(),
                license: details.license.as_deref(),
                visibility: details.visibility,
                width: file.width,
                height: file.height,
            };
            let image: Image = match self.api.post("/api/images", &commit).await {
                Ok(image) => image,
                Err(error) => {
                    UPLOADS_TOTAL.with_label_values(&["commit", "error"]).inc();
                    return Err(error);
                }
            };
            UPLOADS_TOTAL.with_label_values(&["commit", "success"]).inc();

            if let Some(entry) = self.state.write().await.file_mut(&file.id) {
                entry.image_id = Some(image.id.clone());
            }
            images.push(image);
        }

        if let Some(collection_id) = &details.collection_id {
            for image in &images {
                let pair = (collection_id.clone(), image.id.clone());
                if self.state.read().await.collected.contains(&pair) {
                    continue;
                }
                // Goes through the collection store so its local list follows
                self.collections.add_image(collection_id, &image.id).await?;
                self.state.write().await.collected.insert(pair);
            }
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadFile {
        UploadFile {
            id: new_temp_id(),
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            size: 3,
            public_id: None,
            url: None,
            width: None,
            height: None,
            progress: 0,
            error: None,
            image_id: None,
            bytes: Arc::from(vec![1u8, 2, 3]),
        }
    }

    #[test]
    fn select_files_needs_clean_uploads() {
        let mut state = UploadState::default();
        assert!(state.blocker().is_some());

        let mut f = file("a.png");
        state.files.push(f.clone());
        assert_eq!(
            state.blocker().as_deref(),
            Some("Please wait for uploads to finish")
        );

        f.error = Some("Upload failed".to_string());
        state.files[0] = f.clone();
        assert!(state.blocker().unwrap().contains("a.png"));

        f.error = None;
        f.public_id = Some("pixora/a".to_string());
        state.files[0] = f;
        assert!(state.blocker().is_none());
    }

    #[test]
    fn details_need_title_and_description() {
        let mut state = UploadState {
            step: UploadStep::EnterDetails,
            ..Default::default()
        };
        assert_eq!(state.blocker().as_deref(), Some("Title is required"));

        state.details.title = "Sunset".to_string();
        state.details.description = "   ".to_string();
        assert_eq!(state.blocker().as_deref(), Some("Description is required"));

        state.details.description = "Over the bay".to_string();
        assert!(state.blocker().is_none());
    }

    #[test]
    fn uncommitted_skips_published_files() {
        let mut a = file("a.png");
        a.public_id = Some("p/a".to_string());
        let mut b = file("b.png");
        b.public_id = Some("p/b".to_string());
        b.image_id = Some("img-b".to_string());
        let state = UploadState {
            files: vec![a, b, file("c.png")],
            ..Default::default()
        };
        assert_eq!(state.uncommitted(), vec!["p/a".to_string()]);
    }

    #[test]
    fn no_way_back_from_complete() {
        assert_eq!(UploadStep::Complete.previous(), None);
        assert_eq!(UploadStep::SelectFiles.previous(), None);
        assert_eq!(
            UploadStep::PublishingSettings.previous(),
            Some(UploadStep::EnterDetails)
        );
    }
}
