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

const BASE_URL: &str = "https://listado.mercadolibre.com.uy/inmuebles/terrenos/venta";
const PAGE_SIZE: u32 = 48;

const STRATEGIES: &[CardStrategy] = &[
    CardStrategy {
        name: "poly-card",
        card: "li.ui-search-layout__item",
        link: "a.poly-component__title, a.ui-search-link",
        title: ".poly-component__title, h2.ui-search-item__title",
        price: ".poly-price__current .andes-money-amount, .andes-money-amount",
        area: ".poly-attributes_list__item, li.ui-search-card-attributes__attribute",
        location: ".poly-component__location, .ui-search-item__location-label",
        image: "img.poly-component__picture, img.ui-search-result-image__element",
    },
    CardStrategy {
        name: "legacy-result",
        card: "div.ui-search-result, ol.ui-search-layout li",
        link: "a[href*='MLU']",
        title: "h2",
        price: "span.price-tag-amount, [class*='price'] [class*='amount']",
        area: "[class*='attributes'] li, [class*='attributes'] span",
        location: "span[class*='location']",
        image: "img[data-src], img[src*='http']",
    },
];

const DETAIL: DetailSelectors = DetailSelectors {
    title: "h1.ui-pdp-title",
    price: ".ui-pdp-price__second-line .andes-money-amount",
    location: ".ui-vip-location__subtitle p, .ui-pdp-media__title",
    description: ".ui-pdp-description__content",
    images: "figure.ui-pdp-gallery__figure img",
    attribute_row: "tr.andes-table__row",
    attribute_key: "th",
    attribute_value: "td",
};

/// `MLU-612345678` anywhere in the URL becomes `MLU612345678`
pub fn listing_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"MLU-?(\d+)").expect("static regex"));
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| format!("MLU{}", m.as_str()))
}

pub fn page_url(params: &SearchParams, page_number: u32) -> String {
    let mut url = BASE_URL.to_string();
    if let Some(department) = params.department_slug() {
        url.push('/');
        url.push_str(&department);
    }
    if page_number > 1 {
        let offset = (page_number - 1) * PAGE_SIZE + 1;
        url.push_str(&format!("/_Desde_{offset}_NoIndex_True"));
    }
    url
}

/// MercadoLibre Uruguay land listings
pub struct MercadoLibreParser {
    client: SiteClient,
}

impl MercadoLibreParser {
    pub fn new(client: SiteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceParser for MercadoLibreParser {
    fn source(&self) -> Source {
        Source::MercadoLibre
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
