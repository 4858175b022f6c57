//! Docker Hub source adapter
//!
//! Lists repository tags through the Hub tags API with bounded pagination.
//! Anonymous access is subject to Docker Hub's hard pull quota (on the order
//! of 100 pulls per 6-hour rolling window), so callers must treat
//! `RateLimited` responses as retryable backoff signals, never as fatal.

use crate::error::{MirrorError, Result};
use crate::registry::{classify_response, parse_retry_after, RegistryAdapter};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://registry.hub.docker.com/v2";
const PAGE_SIZE: usize = 100;

/// One page of the Hub tags listing.
#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    results: Vec<TagEntry>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

pub struct HubAdapter {
    client: reqwest::Client,
    base_url: String,
    /// Hard bound on pages fetched per repository, to stay inside the
    /// anonymous quota even for repositories with thousands of tags.
    max_pages: usize,
}

impl HubAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        // Fail early on a malformed base URL instead of on the first request.
        url::Url::parse(base_url)
            .map_err(|e| MirrorError::InvalidSpec(format!("bad registry URL {}: {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_pages: 5,
        })
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn fetch_page(&self, repository: &str, page: usize) -> Result<TagPage> {
        let url = format!("{}/repositories/{}/tags", self.base_url, repository);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("page_size", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
                ("ordering", "last_updated".to_string()),
            ])
            .send()
            .await
            .map_err(|e| MirrorError::Transient(format!("{}: {}", repository, e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return Err(classify_response(status, retry_after, repository));
        }

        let page: TagPage = response
            .json()
            .await
            .map_err(|e| MirrorError::Transient(format!("{}: bad tag listing: {}", repository, e)))?;
        Ok(page)
    }
}

#[async_trait]
impl RegistryAdapter for HubAdapter {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();

        for page in 1..=self.max_pages {
            let listing = self.fetch_page(repository, page).await?;
            if listing.results.is_empty() {
                break;
            }
            tags.extend(listing.results.into_iter().map(|t| t.name));
            if listing.next.is_none() {
                break;
            }
        }

        Ok(tags)
    }

    async fn exists(&self, repository: &str, tag: &str) -> Result<bool> {
        let url = format!("{}/repositories/{}/tags/{}", self.base_url, repository, tag);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MirrorError::Transient(format!("{}:{}: {}", repository, tag, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            let retry_after = parse_retry_after(response.headers());
            Err(classify_response(
                status,
                retry_after,
                &format!("{}:{}", repository, tag),
            ))
        }
    }
}
