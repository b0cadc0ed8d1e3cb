use crate::error::{ParseError, ParseResult};
use crate::scrapers::pacing::ClientIdentity;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::FetchedPage;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::debug;

/// Plain HTTP page fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client bound to one identity and, optionally, one proxy
    pub fn new(identity: &ClientIdentity, proxy: Option<&str>, timeout: Duration) -> ParseResult<Self> {
        let setup_error = |reason: String| ParseError::Transient {
            url: proxy.unwrap_or("direct").to_string(),
            reason,
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(identity.accept_language));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(identity.user_agent)
            .default_headers(headers);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|e| setup_error(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| setup_error(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> ParseResult<FetchedPage> {
        debug!("Fetching URL: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| ParseError::Transient {
            url: url.to_string(),
            reason: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            },
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| ParseError::Transient {
            url: url.to_string(),
            reason: format!("failed to read response body: {e}"),
        })?;

        debug!("Downloaded {} bytes of HTML (HTTP {})", body.len(), status);

        Ok(FetchedPage {
            url: final_url,
            status,
            body,
        })
    }
}
