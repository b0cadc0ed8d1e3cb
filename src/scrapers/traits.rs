use crate::error::ParseResult;
use crate::models::{RawListing, Source};
use crate::scrapers::types::{FetchedPage, ListingPage, SearchParams};
use async_trait::async_trait;

/// Common contract for all marketplace parsers
///
/// Parsers never retry on their own: a `Blocked` or `Transient` error goes
/// straight back to the caller.
#[async_trait]
pub trait SourceParser: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch and extract one result page (1-based)
    async fn fetch_list(&self, params: &SearchParams, page_number: u32) -> ParseResult<ListingPage>;

    /// Visit the listing's detail page and return an enriched copy
    async fn fetch_detail(&self, raw: &RawListing) -> ParseResult<RawListing>;

    /// Sources whose cards lack price or area need the detail page
    fn requires_detail(&self) -> bool {
        false
    }
}

/// Transport used by parsers to load a page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> ParseResult<FetchedPage>;
}
