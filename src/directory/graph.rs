//! Microsoft Graph directory client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::auth::GroupIdSet;
use crate::credential::TokenProvider;
use crate::directory::DirectoryClient;
use crate::error::{Error, Result};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Graph v1.0 endpoint
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Per-request network timeout for directory calls
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on `@odata.nextLink` pages followed for one lookup
pub const MAX_PAGES: u32 = 100;

/// One page of a Graph collection response
#[derive(Debug, Deserialize)]
struct DirectoryObjectPage {
    #[serde(default)]
    value: Vec<DirectoryObject>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryObject {
    id: String,
}

/// Directory client backed by Microsoft Graph
pub struct GraphDirectoryClient {
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryConfig,
    http_client: reqwest::Client,
}

impl GraphDirectoryClient {
    /// Create a client against the public Graph endpoint
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_base_url(tokens, DEFAULT_GRAPH_BASE_URL)
    }

    /// Create a client against a specific Graph-compatible endpoint
    pub fn with_base_url(tokens: Arc<dyn TokenProvider>, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid directory URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Directory URL cannot be a base: {}",
                base_url
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            tokens,
            retry: RetryConfig::directory(),
            http_client,
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `{base}/users/{user}/{tail...}`, with each segment percent-encoded
    fn user_url(&self, user: &str, tail: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("users").push(user).extend(tail);
        }
        url.query_pairs_mut().append_pair("$select", "id");
        url
    }

    async fn get(&self, url: Url, token: &str) -> Result<reqwest::Response> {
        self.http_client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(Error::from)
    }

    /// Walk every page of transitiveMemberOf; one call is one retryable attempt
    async fn fetch_transitive_groups(&self, subject_id: &str, token: &str) -> Result<GroupIdSet> {
        let mut groups = GroupIdSet::new();
        let mut next = Some(self.user_url(subject_id, &["transitiveMemberOf"]));
        let mut pages = 0u32;

        while let Some(url) = next.take() {
            if pages >= MAX_PAGES {
                return Err(Error::DirectoryTransport(format!(
                    "membership exceeds {} pages",
                    MAX_PAGES
                )));
            }

            let response = self.get(url, token).await?;
            let page: DirectoryObjectPage = read_success(response).await?;

            pages += 1;
            groups.extend(page.value.into_iter().map(|o| o.id));

            next = page
                .next_link
                .map(|link| self.next_page_url(&link))
                .transpose()?;
        }

        debug!(
            subject = %subject_id,
            pages = pages,
            group_count = groups.len(),
            "Fetched transitive memberships"
        );

        Ok(groups)
    }

    /// Parse a continuation link; the bearer token only goes back to the base origin
    fn next_page_url(&self, link: &str) -> Result<Url> {
        let url = Url::parse(link)
            .map_err(|e| Error::DirectoryTransport(format!("invalid nextLink {}: {}", link, e)))?;
        if url.origin() != self.base_url.origin() {
            return Err(Error::DirectoryTransport(format!(
                "nextLink leaves directory origin: {}",
                url.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }

    async fn fetch_object_id(&self, user_name: &str, token: &str) -> Result<Option<String>> {
        let response = self.get(self.user_url(user_name, &[]), token).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let object: DirectoryObject = read_success(response).await?;
        Ok(Some(object.id))
    }
}

/// Decode a 2xx JSON body, or turn the response into `DirectoryQuery`
async fn read_success<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::DirectoryQuery {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| Error::DirectoryTransport(format!("invalid directory response: {}", e)))
}

#[async_trait]
impl DirectoryClient for GraphDirectoryClient {
    #[instrument(skip(self), fields(otel.kind = "client"))]
    async fn resolve_groups(&self, subject_id: &str) -> Result<GroupIdSet> {
        let token = self.tokens.token().await?;

        retry_with_backoff(
            &self.retry,
            "transitive_member_of",
            Error::is_retryable,
            || self.fetch_transitive_groups(subject_id, &token),
        )
        .await
    }

    #[instrument(skip(self), fields(otel.kind = "client"))]
    async fn resolve_object_id(&self, user_name: &str) -> Result<Option<String>> {
        let token = self.tokens.token().await?;

        retry_with_backoff(&self.retry, "resolve_user", Error::is_retryable, || {
            self.fetch_object_id(user_name, &token)
        })
        .await
    }
}
