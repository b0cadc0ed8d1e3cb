pub mod browser;
pub mod challenge;
pub mod client;
pub mod gallito;
pub mod http;
pub mod infocasas;
pub mod mercadolibre;
pub mod pacing;
pub mod strategy;
pub mod traits;
pub mod types;

pub use browser::BrowserFetcher;
pub use client::SiteClient;
pub use gallito::GallitoParser;
pub use http::HttpFetcher;
pub use infocasas::InfoCasasParser;
pub use mercadolibre::MercadoLibreParser;
pub use pacing::{ClientIdentity, PacingConfig};
pub use traits::{PageFetcher, SourceParser};
pub use types::{FetchedPage, ListingPage, SearchParams};

use crate::error::ParseResult;
use crate::models::Source;
use std::sync::Arc;
use std::time::Duration;

/// How pages are downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchEngine {
    /// Plain HTTP client with browser-like headers
    Http { timeout: Duration },
    /// Headless Chrome, for pages that need JavaScript
    Browser { headless: bool },
}

/// Open a fetch session with a fresh client identity, optionally through a proxy
pub fn open_fetcher(engine: FetchEngine, proxy: Option<&str>) -> ParseResult<Arc<dyn PageFetcher>> {
    let identity = ClientIdentity::random();
    let fetcher: Arc<dyn PageFetcher> = match engine {
        FetchEngine::Http { timeout } => Arc::new(HttpFetcher::new(&identity, proxy, timeout)?),
        FetchEngine::Browser { headless } => Arc::new(BrowserFetcher::launch(headless, proxy, identity)?),
    };
    Ok(fetcher)
}

/// The parser variant for `source`, reading pages through `fetcher`
pub fn build_parser(source: Source, fetcher: Arc<dyn PageFetcher>, pacing: PacingConfig) -> Box<dyn SourceParser> {
    let client = SiteClient::new(source, fetcher, pacing);
    match source {
        Source::MercadoLibre => Box::new(MercadoLibreParser::new(client)),
        Source::InfoCasas => Box::new(InfoCasasParser::new(client)),
        Source::Gallito => Box::new(GallitoParser::new(client)),
    }
}
