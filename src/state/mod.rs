//! Store building blocks
//!
//! Shared by every store:
//! - Optimistic mutation with rollback
//! - In-flight request de-duplication
//! - Change notifications
//! - Background refresh (push with polling fallback)

mod events;
mod inflight;
mod optimistic;
mod refresh;

pub use events::{EventBus, InteractionKind, StoreEvent};
pub use inflight::InFlight;
pub use optimistic::OptimisticMutation;
pub use refresh::{Poller, RefreshHandle, Watcher};
