//! Sequential page walker with a fixed courtesy delay and a hard page ceiling.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use catsync_core::RawListing;
use serde::Serialize;
use tracing::{debug, info_span, warn, Instrument};

use crate::ListingPageSource;

/// Why pagination stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    EmptyPage,
    ShortPage,
    TotalPagesReached,
    MaxPages,
    PageFailed { page: u32, error: String },
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::PageFailed { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EmptyPage => f.write_str("empty page"),
            StopReason::ShortPage => f.write_str("short page"),
            StopReason::TotalPagesReached => f.write_str("provider total_pages reached"),
            StopReason::MaxPages => f.write_str("page ceiling reached"),
            StopReason::PageFailed { page, error } => write!(f, "page {page} failed: {error}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// All listings in page order, first occurrence of each external id only.
    pub listings: Vec<RawListing>,
    pub pages_fetched: u32,
    pub duplicates: usize,
    pub stop: StopReason,
}

impl FetchOutcome {
    /// True when the very first request failed, so nothing at all was collected.
    pub fn failed_before_any_page(&self) -> bool {
        self.stop.is_failure() && self.pages_fetched == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaginatedFetcher {
    page_size: u32,
    max_pages: u32,
    delay: Duration,
}

impl PaginatedFetcher {
    pub fn new(page_size: u32, max_pages: u32, delay: Duration) -> Self {
        Self {
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            delay,
        }
    }

    /// Walks pages 1..=max_pages strictly in order. A failed page ends the walk
    /// but keeps everything collected before it.
    pub async fn fetch_all(&self, source: &dyn ListingPageSource) -> FetchOutcome {
        let mut seen = HashSet::new();
        let mut listings = Vec::new();
        let mut pages_fetched = 0;
        let mut duplicates = 0;
        let mut page = 1;

        let stop = loop {
            let result = source
                .fetch_page(page, self.page_size)
                .instrument(info_span!("provider_page", page))
                .await;

            let fetched = match result {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(page, error = %err, "page fetch failed; stopping pagination");
                    break StopReason::PageFailed {
                        page,
                        error: err.to_string(),
                    };
                }
            };
            pages_fetched += 1;

            let count = fetched.items.len();
            debug!(page, count, total_pages = ?fetched.total_pages, "page fetched");
            for item in fetched.items {
                if seen.insert(item.id.clone()) {
                    listings.push(item);
                } else {
                    duplicates += 1;
                    warn!(page, external_id = %item.id, "duplicate listing across pages; keeping first");
                }
            }

            if count == 0 {
                break StopReason::EmptyPage;
            }
            if count < self.page_size as usize {
                break StopReason::ShortPage;
            }
            if fetched.total_pages.is_some_and(|total| page >= total) {
                break StopReason::TotalPagesReached;
            }
            if page >= self.max_pages {
                warn!(max_pages = self.max_pages, "page ceiling reached");
                break StopReason::MaxPages;
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            page += 1;
        };

        FetchOutcome {
            listings,
            pages_fetched,
            duplicates,
            stop,
        }
    }
}
