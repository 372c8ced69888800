//! Search service

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, Page, PageRequest};
use crate::data::{Image, UserSummary};
use crate::error::Result;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

const TRENDING_TTL: Duration = Duration::from_secs(300);

/// Result ordering for image search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    #[default]
    Relevance,
    Recent,
    Popular,
}

impl SearchSort {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Recent => "recent",
            Self::Popular => "popular",
        }
    }
}

/// Optional narrowing of an image search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub license: Option<String>,
    pub sort: SearchSort,
}

impl SearchFilters {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("sort", self.sort.as_str().to_string())];
        if let Some(category) = &self.category {
            query.push(("category", category.clone()));
        }
        if !self.tags.is_empty() {
            query.push(("tags", self.tags.join(",")));
        }
        if let Some(license) = &self.license {
            query.push(("license", license.clone()));
        }
        query
    }
}

/// A tag and how often it was used recently
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrendingTag {
    #[serde(alias = "_id", alias = "name")]
    pub tag: String,
    #[serde(default)]
    pub count: u64,
}

pub struct SearchService {
    api: Arc<ApiClient>,
    trending: Cache<(), Arc<Vec<TrendingTag>>>,
}

impl SearchService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            trending: Cache::builder()
                .max_capacity(1)
                .time_to_live(TRENDING_TTL)
                .build(),
        }
    }

    /// Images matching `query`; a blank query returns an empty page
    /// without a request
    pub async fn search_images(
        &self,
        query: &str,
        filters: &SearchFilters,
        request: PageRequest,
    ) -> Result<Page<Image>> {
        let query = query.trim();
        if query.is_empty() && filters.tags.is_empty() && filters.category.is_none() {
            return Ok(Page::from_parts(Vec::new(), None, request));
        }

        let mut params = vec![("q", query.to_string())];
        params.extend(filters.query());
        tracing::debug!(query = %query, page = request.page, "Searching images");
        self.api
            .get_page("/api/search/images", request, &params)
            .await
    }

    pub async fn search_users(&self, query: &str, request: PageRequest) -> Result<Page<UserSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Page::from_parts(Vec::new(), None, request));
        }
        self.api
            .get_page("/api/search/users", request, &[("q", query.to_string())])
            .await
    }

    /// Popular tags, cached for a few minutes
    pub async fn trending_tags(&self) -> Result<Vec<TrendingTag>> {
        if let Some(tags) = self.trending.get(&()).await {
            CACHE_HITS_TOTAL.with_label_values(&["trending_tags"]).inc();
            return Ok(tags.as_ref().clone());
        }
        CACHE_MISSES_TOTAL
            .with_label_values(&["trending_tags"])
            .inc();

        let tags: Vec<TrendingTag> = self.api.get("/api/search/trending").await?;
        self.trending.insert((), Arc::new(tags.clone())).await;
        Ok(tags)
    }
}
