use crate::error::ParseResult;
use crate::models::{RawListing, Source};
use crate::scrapers::client::SiteClient;
use crate::scrapers::strategy::{enrich_from_detail, extract_cards, CardStrategy, DetailSelectors};
use crate::scrapers::traits::SourceParser;
use crate::scrapers::types::{ListingPage, SearchParams};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

const BASE_URL: &str = "https://www.gallito.com.uy/inmuebles/terrenos/venta";

// Gallito cards only carry title, price and a link; area lives on the detail page.
const STRATEGIES: &[CardStrategy] = &[
    CardStrategy {
        name: "aviso-container",
        card: "article.aviso-container, div.aviso-container",
        link: "a[href*='-inmuebles-']",
        title: ".aviso-titulo, h2",
        price: ".contenedor-precio span, .precio",
        area: ".aviso-datos li, .superficie",
        location: ".aviso-ubicacion, .ubicacion",
        image: "img",
    },
    CardStrategy {
        name: "link-scan",
        card: "div[class*='aviso'], li[class*='aviso'], article",
        link: "a[href*='-inmuebles-']",
        title: "h2, h3, a[href*='-inmuebles-']",
        price: "[class*='precio']",
        area: "li, span",
        location: "[class*='ubicacion']",
        image: "img",
    },
];

const DETAIL: DetailSelectors = DetailSelectors {
    title: "#div_datosBasicos h1.titulo",
    price: "#div_datosBasicos span.precio",
    location: "#div_datosBasicos .ubicacion, ol#ol_breadcrumb li:last-child a",
    description: "section#descripcion div.p-3",
    images: "#galeria img, .carousel-inner img",
    attribute_row: "#div_datosOperacion .wrapperDatos",
    attribute_key: "span, h5",
    attribute_value: "p",
};

/// `…-inmuebles-23456789` becomes `23456789`
pub fn listing_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"-inmuebles-(\d+)").expect("static regex"));
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn page_url(params: &SearchParams, page_number: u32) -> String {
    let mut url = BASE_URL.to_string();
    if let Some(department) = params.department_slug() {
        url.push('/');
        url.push_str(&department);
    }
    format!("{url}?pag={page_number}")
}

/// Gallito land listings, two-stage: list cards then detail pages
pub struct GallitoParser {
    client: SiteClient,
}

impl GallitoParser {
    pub fn new(client: SiteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceParser for GallitoParser {
    fn source(&self) -> Source {
        Source::Gallito
    }

    async fn fetch_list(&self, params: &SearchParams, page_number: u32) -> ParseResult<ListingPage> {
        let url = page_url(params, page_number);
        info!(source = %self.source(), page = page_number, %url, "Fetching result page");

        let page = self.client.get(&url).await?;
        let (strategy, listings) = extract_cards(&page.body, &page.url, STRATEGIES, listing_id)?;

        Ok(ListingPage {
            page_number,
            url: page.url,
            strategy,
            listings,
        })
    }

    async fn fetch_detail(&self, raw: &RawListing) -> ParseResult<RawListing> {
        let page = self.client.get(&raw.url).await?;
        enrich_from_detail(raw, &page.body, &page.url, &DETAIL)
    }

    fn requires_detail(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_comes_from_inmuebles_suffix() {
        assert_eq!(
            listing_id("https://www.gallito.com.uy/campo-en-florida-inmuebles-23456789"),
            Some("23456789".to_string())
        );
        assert_eq!(listing_id("https://www.gallito.com.uy/inmuebles"), None);
    }

    #[test]
    fn pagination_uses_query() {
        assert_eq!(
            page_url(&SearchParams::default(), 2),
            format!("{BASE_URL}?pag=2")
        );
    }
}
