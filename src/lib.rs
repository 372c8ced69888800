//! Pixora - client-side state core for the Pixora image-sharing platform
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Session, follow, interaction and directory stores        │
//! │  - Messages and reels with background refresh               │
//! │  - Upload workflow, comments, images, collections, search   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     State Layer                              │
//! │  - Optimistic mutations with rollback                       │
//! │  - In-flight request de-duplication                         │
//! │  - Change events, polling and server-sent events            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 API Layer / Data Layer                       │
//! │  - REST client (reqwest) with `{ success, data }` envelope  │
//! │  - Expiring values, profile cache (moka)                    │
//! │  - Session/local key-value storage                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP client, response envelope, event stream
//! - `state`: Building blocks shared by the stores
//! - `service`: The stores themselves
//! - `data`: Models, caches and key-value storage
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;
pub mod state;

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;

use crate::data::{FileStore, KeyValueStore, MemoryStore};
use crate::state::{EventBus, RefreshHandle};

const SESSION_STORE_FILE: &str = "session.json";
const LOCAL_STORE_FILE: &str = "local.json";

/// Client state shared by every screen
///
/// Cheap to clone; all stores are behind `Arc`.
#[derive(Clone)]
pub struct Pixora {
    /// Client configuration
    pub config: Arc<config::ClientConfig>,

    /// Backend client carrying the bearer token
    pub api: Arc<api::ApiClient>,

    /// Store change notifications
    pub events: EventBus,

    /// Session-scoped storage (identity cache, token)
    pub session_storage: Arc<dyn KeyValueStore>,

    /// Long-lived storage (theme)
    pub local_storage: Arc<dyn KeyValueStore>,

    pub session: Arc<service::SessionStore>,
    pub follows: Arc<service::FollowStore>,
    pub interactions: Arc<service::InteractionStore>,
    pub directory: Arc<service::UserDirectory>,
    pub messages: Arc<service::MessageStore>,
    pub reels: Arc<service::ReelStore>,
    pub images: Arc<service::ImageService>,
    pub collections: Arc<service::CollectionService>,
    pub search: Arc<service::SearchService>,
    pub theme: Arc<service::ThemePreference>,
}

impl Pixora {
    /// Initialize client state
    ///
    /// # Steps
    /// 1. Validate configuration
    /// 2. Open storage (files under `session.storage_dir`, else memory)
    /// 3. Build the API client
    /// 4. Build the stores, restoring any cached identity
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or storage cannot
    /// be opened
    pub fn new(config: config::ClientConfig) -> Result<Self, error::ClientError> {
        let (session_storage, local_storage): (Arc<dyn KeyValueStore>, Arc<dyn KeyValueStore>) =
            match &config.session.storage_dir {
                Some(dir) => (
                    Arc::new(FileStore::open(dir.join(SESSION_STORE_FILE))?),
                    Arc::new(FileStore::open(dir.join(LOCAL_STORE_FILE))?),
                ),
                None => (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())),
            };
        Self::with_storage(config, session_storage, local_storage)
    }

    /// Initialize with caller-provided storage
    pub fn with_storage(
        config: config::ClientConfig,
        session_storage: Arc<dyn KeyValueStore>,
        local_storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, error::ClientError> {
        config.validate()?;
        tracing::info!(base_url = %config.api.base_url, "Initializing client state...");

        let api = Arc::new(api::ApiClient::new(&config.api)?);
        let events = EventBus::default();
        let page_size = config.pagination.default_limit;

        let session = Arc::new(service::SessionStore::new(
            api.clone(),
            session_storage.clone(),
            local_storage.clone(),
            events.clone(),
            &config.session,
        ));
        let follows = Arc::new(service::FollowStore::new(
            api.clone(),
            session.clone(),
            events.clone(),
        ));
        let interactions = Arc::new(service::InteractionStore::new(api.clone(), events.clone()));
        let directory = Arc::new(service::UserDirectory::new(
            api.clone(),
            session.clone(),
            follows.clone(),
            events.clone(),
            config.polling.directory_refresh(),
        ));
        let messages = Arc::new(service::MessageStore::new(
            api.clone(),
            session.clone(),
            events.clone(),
            page_size,
        ));
        let reels = Arc::new(service::ReelStore::new(
            api.clone(),
            session.clone(),
            events.clone(),
            page_size,
            config.upload.max_file_bytes,
        ));
        let images = Arc::new(service::ImageService::new(api.clone()));
        let collections = Arc::new(service::CollectionService::new(api.clone(), session.clone()));
        let search = Arc::new(service::SearchService::new(api.clone()));
        let theme = Arc::new(service::ThemePreference::new(local_storage.clone()));

        // Per-user stores are emptied whenever the session ends
        let scoped: [Weak<dyn service::SessionScoped>; 7] = [
            Arc::downgrade(&follows) as Weak<dyn service::SessionScoped>,
            Arc::downgrade(&interactions) as Weak<dyn service::SessionScoped>,
            Arc::downgrade(&directory) as Weak<dyn service::SessionScoped>,
            Arc::downgrade(&messages) as Weak<dyn service::SessionScoped>,
            Arc::downgrade(&reels) as Weak<dyn service::SessionScoped>,
            Arc::downgrade(&images) as Weak<dyn service::SessionScoped>,
            Arc::downgrade(&collections) as Weak<dyn service::SessionScoped>,
        ];
        for store in scoped {
            session.register_scoped(store);
        }

        tracing::info!("Client state initialized");

        Ok(Self {
            config: Arc::new(config),
            api,
            events,
            session_storage,
            local_storage,
            session,
            follows,
            interactions,
            directory,
            messages,
            reels,
            images,
            collections,
            search,
            theme,
        })
    }

    /// Start a fresh upload session
    pub fn upload_workflow(&self) -> service::UploadWorkflow {
        service::UploadWorkflow::new(
            self.api.clone(),
            self.session.clone(),
            self.collections.clone(),
            self.events.clone(),
            &self.config.upload,
        )
    }

    /// Comment thread for one image
    pub fn comment_thread(&self, image_id: impl Into<String>) -> service::CommentThread {
        service::CommentThread::new(
            self.api.clone(),
            self.session.clone(),
            image_id,
            self.config.pagination.default_limit,
        )
    }

    /// Sign out; every user-specific store is emptied with the session
    pub async fn logout(&self) {
        self.session.logout().await;
    }

    /// Start background refresh: directory polling, message and reel
    /// watchers, and the auth guard
    ///
    /// Everything stops when the returned handles are dropped.
    pub fn spawn_background(&self) -> Vec<RefreshHandle> {
        let polling = &self.config.polling;
        vec![
            self.directory.spawn_refresh(),
            self.messages.watch(polling.messages(), polling.push_enabled),
            self.reels.watch(polling.reels(), polling.push_enabled),
            self.spawn_auth_guard(),
        ]
    }

    /// End the session whenever the backend rejects the token
    pub fn spawn_auth_guard(&self) -> RefreshHandle {
        let mut failures = self.api.subscribe_auth_failures();
        let client = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match failures.recv().await {
                    Ok(status) => {
                        if client.session.is_authenticated().await {
                            tracing::warn!(status, "Token rejected; ending session");
                            client.session.expire().await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Auth guard lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        RefreshHandle::from_task("auth_guard", task)
    }
}
