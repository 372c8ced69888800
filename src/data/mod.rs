//! Data layer module
//!
//! Handles client-side models and state:
//! - Backend record mirrors
//! - Expiring values and the profile cache (volatile)
//! - Session/local key-value storage

mod cache;
mod models;
mod storage;

pub use cache::{Expiring, ProfileCache, Throttle};
pub use models::*;
pub use storage::{
    CACHED_USER_KEY, CACHED_USER_TIMESTAMP_KEY, FileStore, KeyValueStore, MemoryStore, SESSION_TOKEN_KEY,
    THEME_KEY,
};
