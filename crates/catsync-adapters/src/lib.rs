//! Provider adapter: page source contract, paginated fetch, filtering,
//! classification and transformation of raw provider listings.

use async_trait::async_trait;
use catsync_core::RawListing;
use catsync_storage::{FetchError, HttpFetcher};
use serde::Deserialize;
use thiserror::Error;

pub mod classify;
pub mod filter;
pub mod pagination;
pub mod transform;

pub use classify::{ClassificationRules, Rule, RuleError, RuleTable};
pub use filter::{Availability, RecordFilter, RegionMatcher, Rejection};
pub use pagination::{FetchOutcome, PaginatedFetcher, StopReason};
pub use transform::{TransformContext, TransformError, Transformer};

pub const CRATE_NAME: &str = "catsync-adapters";

pub const API_KEY_HEADER: &str = "Api-Authorization";
pub const PRICE_SCOPE_HEADER: &str = "Price-Scope";

/// One page of provider listings plus whatever pagination metadata came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub items: Vec<RawListing>,
    pub total_pages: Option<u32>,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("malformed page body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Anything that can serve provider pages. 1-based page index.
#[async_trait]
pub trait ListingPageSource: Send + Sync {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<ListingPage, PageError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Vec<RawListing>,
    #[serde(default)]
    meta: Option<EnvelopeMeta>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeMeta {
    #[serde(default)]
    pagination: Option<EnvelopePagination>,
}

#[derive(Debug, Deserialize)]
struct EnvelopePagination {
    #[serde(default)]
    total_pages: Option<u32>,
}

pub fn parse_listing_page(body: &[u8]) -> Result<ListingPage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let total_pages = envelope
        .meta
        .and_then(|m| m.pagination)
        .and_then(|p| p.total_pages);
    Ok(ListingPage {
        items: envelope.data,
        total_pages,
    })
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub price_scope: String,
}

/// HTTP page source for `GET {base}/events?page={n}&per_page={m}`.
pub struct ProviderClient {
    http: HttpFetcher,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(http: HttpFetcher, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    pub fn page_url(&self, page: u32, per_page: u32) -> String {
        format!(
            "{}/events?page={page}&per_page={per_page}",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ListingPageSource for ProviderClient {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<ListingPage, PageError> {
        let url = self.page_url(page, per_page);
        let headers = [
            (API_KEY_HEADER, self.config.api_key.clone()),
            (PRICE_SCOPE_HEADER, self.config.price_scope.clone()),
        ];
        let body = self.http.fetch_bytes(&url, &headers).await?;
        Ok(parse_listing_page(&body)?)
    }
}
