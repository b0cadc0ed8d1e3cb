use crate::error::{ParseError, ParseResult};
use crate::scrapers::pacing::ClientIdentity;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::FetchedPage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use rand::Rng;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const ACCEPT_COOKIES_JS: &str = r#"
    const button = document.querySelector(
        'button[id*="accept"], button[data-testid*="accept"], button[class*="cookie"] , #newCookieDisclaimerButton'
    );
    if (button) button.click();
"#;

/// Page fetcher backed by a headless Chrome session
///
/// One session per orchestrator attempt. Dropping the fetcher drops the
/// `Browser`, which kills the Chrome process.
pub struct BrowserFetcher {
    browser: Browser,
    identity: ClientIdentity,
    settle: Duration,
}

impl BrowserFetcher {
    /// Launch Chrome, optionally through a proxy
    pub fn launch(headless: bool, proxy: Option<&str>, identity: ClientIdentity) -> ParseResult<Self> {
        info!(headless, proxy = proxy.unwrap_or("direct"), "Launching Chrome...");

        let browser = launch_browser(headless, proxy).map_err(|e| ParseError::Transient {
            url: proxy.unwrap_or("direct").to_string(),
            reason: format!("{e:#}"),
        })?;

        Ok(Self {
            browser,
            identity,
            settle: Duration::from_secs(4),
        })
    }
}

fn launch_browser(headless: bool, proxy: Option<&str>) -> Result<Browser> {
    let options = LaunchOptions::default_builder()
        .headless(headless)
        .window_size(Some((1920, 1080)))
        .proxy_server(proxy)
        .build()
        .context("Failed to build launch options")?;

    Browser::new(options).context("Failed to launch Chrome browser")
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> ParseResult<FetchedPage> {
        let browser = self.browser.clone();
        let identity = self.identity.clone();
        let settle = self.settle;
        let target = url.to_string();

        let html = tokio::task::spawn_blocking(move || load_page(&browser, &target, &identity, settle))
            .await
            .map_err(|e| ParseError::Transient {
                url: url.to_string(),
                reason: format!("browser task failed: {e}"),
            })?
            .map_err(|e| ParseError::Transient {
                url: url.to_string(),
                reason: format!("{e:#}"),
            })?;

        Ok(FetchedPage {
            url: url.to_string(),
            // CDP does not surface the document status; challenge markers cover blocks
            status: 200,
            body: html,
        })
    }
}

fn load_page(browser: &Browser, url: &str, identity: &ClientIdentity, settle: Duration) -> Result<String> {
    let tab = browser.new_tab().context("Failed to open tab")?;
    tab.set_user_agent(identity.user_agent, Some(identity.accept_language), None)
        .context("Failed to set user agent")?;

    debug!("Navigating to {}", url);
    tab.navigate_to(url)
        .with_context(|| format!("Failed to navigate to {url}"))?;
    tab.wait_until_navigated()
        .with_context(|| format!("Timed out loading {url}"))?;

    thread::sleep(settle);

    // Accept cookies if present
    let _ = tab.evaluate(ACCEPT_COOKIES_JS, false);

    // Scroll down in uneven steps so lazy images load and pacing looks human
    let mut rng = rand::rng();
    for _ in 0..rng.random_range(3..=6) {
        let step = rng.random_range(300..=900);
        let _ = tab.evaluate(&format!("window.scrollBy(0, {step});"), false);
        thread::sleep(Duration::from_millis(rng.random_range(400..=1500)));
    }

    let html = tab.get_content().context("Failed to read page HTML")?;
    let _ = tab.close(true);

    debug!("Captured {} bytes of HTML from {}", html.len(), url);
    Ok(html)
}
