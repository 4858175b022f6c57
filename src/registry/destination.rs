//! Destination registry adapter
//!
//! Talks to the destination's OCI distribution API (`/v2/`) for tag listings
//! and manifest existence checks. A caller-supplied bearer token is passed
//! through as-is; this adapter does no credential management of its own.

use crate::error::{MirrorError, Result};
use crate::registry::{classify_response, parse_retry_after, RegistryAdapter};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct DestinationAdapter {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl DestinationAdapter {
    /// `registry` is a bare host like `ghcr.io`.
    pub fn new(registry: &str, token: Option<String>) -> Result<Self> {
        let base_url = if registry.contains("://") {
            registry.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", registry.trim_end_matches('/'))
        };
        url::Url::parse(&base_url)
            .map_err(|e| MirrorError::InvalidSpec(format!("bad registry {}: {}", registry, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RegistryAdapter for DestinationAdapter {
    /// `repository` is the full destination path, e.g. `owner/library__nginx`.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| MirrorError::Transient(format!("{}: {}", repository, e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return Err(classify_response(status, retry_after, repository));
        }

        let listing: TagList = response
            .json()
            .await
            .map_err(|e| MirrorError::Transient(format!("{}: bad tag listing: {}", repository, e)))?;
        Ok(listing.tags.unwrap_or_default())
    }

    async fn exists(&self, repository: &str, tag: &str) -> Result<bool> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag);
        let response = self
            .with_auth(self.client.head(&url))
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| MirrorError::Transient(format!("{}:{}: {}", repository, tag, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            // Registries answer 401/403 for repositories that have never been
            // pushed. Reporting "absent" lets the copy proceed, which is safe
            // because copies are idempotent.
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
