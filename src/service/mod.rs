//! Service layer
//!
//! One store per concern. Each owns its state and receives the shared
//! API client and event bus at construction.

mod collections;
mod comments;
mod directory;
mod follow;
mod images;
mod interaction;
mod messages;
mod reels;
mod search;
mod session;
mod theme;
mod upload;

pub use collections::CollectionService;
pub use comments::CommentThread;
pub use directory::{UserDirectory, featured_creators, random_users};
pub use follow::{FollowOp, FollowStore};
pub use images::ImageService;
pub use interaction::InteractionStore;
pub use messages::{ActiveConversation, MessageStore};
pub use reels::{ReelFlag, ReelStore, ReelVideo};
pub use search::{SearchFilters, SearchService, SearchSort, TrendingTag};
pub use session::{Registration, SessionScoped, SessionStore};
pub use theme::ThemePreference;
pub use upload::{UploadDetails, UploadFile, UploadSnapshot, UploadStep, UploadWorkflow};

use futures::future::BoxFuture;

impl SessionScoped for FollowStore {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}

impl SessionScoped for InteractionStore {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}

impl SessionScoped for UserDirectory {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}

impl SessionScoped for MessageStore {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}

impl SessionScoped for ReelStore {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}

impl SessionScoped for ImageService {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}

impl SessionScoped for CollectionService {
    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.reset())
    }
}
