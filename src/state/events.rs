//! Store change notifications
//!
//! Stores publish what changed; consumers subscribe instead of polling
//! store state.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Which interaction map changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Like,
    Favorite,
}

/// A change in some store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Signed in, verified, or signed out (`None`)
    SessionChanged { user_id: Option<String> },
    FollowChanged { target_id: String, following: bool },
    InteractionChanged {
        image_id: String,
        kind: InteractionKind,
        active: bool,
    },
    DirectoryRefreshed { users: usize },
    ConversationsUpdated { unread: u64 },
    MessageAdded { conversation_id: String },
    ReelsUpdated { items: usize },
    UploadStepChanged { step: &'static str },
}

/// Broadcast channel shared by all stores
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: StoreEvent) {
        tracing::trace!(?event, "Store event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`; lagged receivers yield an error item
    pub fn stream(&self) -> BroadcastStream<StoreEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
