use crate::error::ParseResult;
use crate::models::Source;
use crate::scrapers::challenge::ensure_content;
use crate::scrapers::pacing::{Pacer, PacingConfig};
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::FetchedPage;
use std::sync::Arc;

/// Paced, challenge-checked page access shared by one parser's list and
/// detail requests. Requests go out strictly one at a time.
pub struct SiteClient {
    source: Source,
    fetcher: Arc<dyn PageFetcher>,
    pacer: Pacer,
}

impl SiteClient {
    pub fn new(source: Source, fetcher: Arc<dyn PageFetcher>, pacing: PacingConfig) -> Self {
        Self {
            source,
            fetcher,
            pacer: Pacer::new(pacing),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub async fn get(&self, url: &str) -> ParseResult<FetchedPage> {
        self.pacer.wait().await;
        let page = self.fetcher.fetch(url).await?;
        ensure_content(self.source, &page)?;
        Ok(page)
    }
}
