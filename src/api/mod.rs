//! Backend API layer
//!
//! - `ApiClient`: authenticated REST calls with envelope decoding
//! - Envelope and pagination types
//! - Server-sent event subscription

mod client;
mod envelope;
mod events;

pub use client::{ApiClient, endpoint_label, segment};
pub use envelope::{Envelope, Page, PageMetadata, PageRequest};
pub use events::{ServerEvent, SseParser, subscribe};
