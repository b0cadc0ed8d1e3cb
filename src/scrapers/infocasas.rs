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

const BASE_URL: &str = "https://www.infocasas.com.uy/venta/terrenos";

const STRATEGIES: &[CardStrategy] = &[
    CardStrategy {
        name: "listing-card",
        card: "div.listingCard",
        link: "a.lc-data, a.lc-cardCover, a[href]",
        title: ".lc-title",
        price: ".main-price",
        area: ".lc-typologyTag__item, .lc-typologyTag strong",
        location: ".lc-location",
        image: ".lc-cardCover img",
    },
    CardStrategy {
        name: "property-card",
        card: "article[class*='card'], div[class*='PropertyCard']",
        link: "a[href*='/inmueble'], a[href]",
        title: "h2, h3",
        price: "[class*='price'], [class*='Price']",
        area: "[class*='typology'] span, [class*='features'] span, li",
        location: "[class*='location'], [class*='Location']",
        image: "img",
    },
];

const DETAIL: DetailSelectors = DetailSelectors {
    title: "h1.property-title, h1",
    price: ".ficha-tecnica .price, .property-price",
    location: ".property-location, .ficha-tecnica .location",
    description: "#descripcion, .property-description",
    images: ".gallery-image img, .swiper-slide img",
    attribute_row: ".ficha-tecnica .technical-sheet div, .property-facts li",
    attribute_key: "span:first-child, .key",
    attribute_value: "strong, span:last-child, .value",
};

/// The trailing numeric segment of the listing URL
pub fn listing_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"/(\d{4,})(?:[/?#]|$)").expect("static regex"));
    re.captures_iter(url)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn page_url(params: &SearchParams, page_number: u32) -> String {
    let mut url = BASE_URL.to_string();
    if let Some(department) = params.department_slug() {
        url.push('/');
        url.push_str(&department);
    }
    if page_number > 1 {
        url.push_str(&format!("/pagina{page_number}"));
    }
    url
}

/// InfoCasas land listings
pub struct InfoCasasParser {
    client: SiteClient,
}

impl InfoCasasParser {
    pub fn new(client: SiteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceParser for InfoCasasParser {
    fn source(&self) -> Source {
        Source::InfoCasas
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_last_numeric_segment() {
        assert_eq!(
            listing_id("https://www.infocasas.com.uy/terreno-en-punta-del-este/190345678"),
            Some("190345678".to_string())
        );
        assert_eq!(
            listing_id("https://www.infocasas.com.uy/venta/terrenos/pagina2"),
            None
        );
    }

    #[test]
    fn pagination_appends_page_segment() {
        let params = SearchParams::default();
        assert_eq!(page_url(&params, 1), BASE_URL);
        assert_eq!(page_url(&params, 2), format!("{BASE_URL}/pagina2"));
    }
}
