//! Response envelope and pagination types
//!
//! Every backend response has the shape
//! `{ success, data, message?, error?, metadata? }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Option<PageMetadata>,
}

impl Envelope {
    /// Server-provided explanation, preferring `message` over `error`
    pub fn explanation(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .filter(|m| !m.trim().is_empty())
    }
}

/// Pagination metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub limit: u32,
}

/// Requested page (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { page: 1, limit }
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
        ]
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub pages: u32,
    pub total: u64,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Build from decoded items and the optional metadata
    ///
    /// Without metadata, a full page is taken to mean more may follow.
    pub fn from_parts(items: Vec<T>, metadata: Option<PageMetadata>, request: PageRequest) -> Self {
        match metadata {
            Some(meta) => Self {
                page: if meta.page == 0 { request.page } else { meta.page },
                pages: meta.pages,
                total: meta.total,
                limit: if meta.limit == 0 { request.limit } else { meta.limit },
                items,
            },
            None => {
                let full = items.len() as u32 >= request.limit;
                Self {
                    page: request.page,
                    pages: if full { request.page + 1 } else { request.page },
                    total: items.len() as u64,
                    limit: request.limit,
                    items,
                }
            }
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.pages
    }

    pub fn request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_more_follows_metadata() {
        let page = Page::from_parts(
            vec![1, 2],
            Some(PageMetadata {
                total: 10,
                page: 1,
                pages: 5,
                limit: 2,
            }),
            PageRequest::first(2),
        );
        assert!(page.has_more());

        let last = Page::from_parts(
            vec![1],
            Some(PageMetadata {
                total: 9,
                page: 5,
                pages: 5,
                limit: 2,
            }),
            PageRequest { page: 5, limit: 2 },
        );
        assert!(!last.has_more());
    }

    #[test]
    fn has_more_without_metadata_uses_page_fill() {
        let full = Page::from_parts(vec![1, 2, 3], None, PageRequest::first(3));
        assert!(full.has_more());

        let partial = Page::from_parts(vec![1], None, PageRequest::first(3));
        assert!(!partial.has_more());
    }

    #[test]
    fn envelope_prefers_message() {
        let envelope: Envelope = serde_json::from_value(serde_json::json!({
            "success": false,
            "message": "Title is required",
            "error": "ValidationError"
        }))
        .unwrap();
        assert_eq!(envelope.explanation().as_deref(), Some("Title is required"));
        assert!(envelope.data.is_null());
    }
}
