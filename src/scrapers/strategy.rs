//! Selector-driven extraction with ordered fallback strategies.
//!
//! A site lists its strategies in preference order. The first strategy whose
//! card selector matches and yields listings wins; if none do, the page
//! surfaces a `ParseError::Structure`.

use crate::error::{ParseError, ParseResult};
use crate::models::RawListing;
use crate::normalizer::{area_in_text, parse_area};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// Words in a title that mark rentals or non-land ads
const TITLE_BLACKLIST: &[&str] = &[
    "alquiler", "arriendo", "temporal", "vehiculo", "vehículo", "maquinaria",
];

/// CSS selectors describing a result card layout
#[derive(Debug, Clone, Copy)]
pub struct CardStrategy {
    pub name: &'static str,
    pub card: &'static str,
    pub link: &'static str,
    pub title: &'static str,
    pub price: &'static str,
    /// Attribute nodes; the first one that reads as an area wins
    pub area: &'static str,
    pub location: &'static str,
    pub image: &'static str,
}

/// CSS selectors for a listing's detail page
#[derive(Debug, Clone, Copy)]
pub struct DetailSelectors {
    pub title: &'static str,
    pub price: &'static str,
    pub location: &'static str,
    pub description: &'static str,
    pub images: &'static str,
    pub attribute_row: &'static str,
    pub attribute_key: &'static str,
    pub attribute_value: &'static str,
}

pub type IdExtractor = fn(&str) -> Option<String>;

fn selector(css: &str, url: &str) -> ParseResult<Selector> {
    Selector::parse(css).map_err(|e| ParseError::Structure {
        url: url.to_string(),
        reason: format!("invalid selector '{css}': {e}"),
    })
}

/// Collapse all whitespace runs into single spaces
pub fn clean_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .map(clean_text)
        .find(|t| !t.is_empty())
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|mut u| {
        u.set_fragment(None);
        u.to_string()
    })
}

fn image_src(el: ElementRef<'_>) -> Option<&str> {
    ["data-zoom", "data-src", "src", "content"]
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .find(|v| v.starts_with("http") || v.starts_with("//") || v.starts_with('/'))
}

fn is_blacklisted(title: &str) -> bool {
    let lower = title.to_lowercase();
    TITLE_BLACKLIST.iter().any(|w| lower.contains(w))
}

/// Extract raw listings from a result page using the first working strategy.
pub fn extract_cards(
    html: &str,
    page_url: &str,
    strategies: &[CardStrategy],
    id_from_url: IdExtractor,
) -> ParseResult<(&'static str, Vec<RawListing>)> {
    let base = Url::parse(page_url).map_err(|e| ParseError::Structure {
        url: page_url.to_string(),
        reason: format!("invalid page url: {e}"),
    })?;
    let document = Html::parse_document(html);
    let mut tried = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        match apply_strategy(&document, &base, page_url, strategy, id_from_url) {
            Ok(listings) if !listings.is_empty() => return Ok((strategy.name, listings)),
            Ok(_) => tried.push(format!("{}: no listing cards", strategy.name)),
            Err(e) => tried.push(format!("{}: {e}", strategy.name)),
        }
        debug!(strategy = strategy.name, url = %page_url, "Extraction strategy found nothing, trying next");
    }

    Err(ParseError::Structure {
        url: page_url.to_string(),
        reason: tried.join("; "),
    })
}

fn apply_strategy(
    document: &Html,
    base: &Url,
    page_url: &str,
    strategy: &CardStrategy,
    id_from_url: IdExtractor,
) -> ParseResult<Vec<RawListing>> {
    let card_sel = selector(strategy.card, page_url)?;
    let link_sel = selector(strategy.link, page_url)?;
    let title_sel = selector(strategy.title, page_url)?;
    let price_sel = selector(strategy.price, page_url)?;
    let area_sel = selector(strategy.area, page_url)?;
    let location_sel = selector(strategy.location, page_url)?;
    let image_sel = selector(strategy.image, page_url)?;

    let mut listings = Vec::new();
    for card in document.select(&card_sel) {
        let Some(link) = card.select(&link_sel).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(|h| absolutize(base, h)) else {
            continue;
        };
        let Some(id) = id_from_url(&url) else {
            continue;
        };

        let title = first_text(card, &title_sel)
            .or_else(|| link.value().attr("title").map(str::to_string))
            .or_else(|| Some(clean_text(link)).filter(|t| !t.is_empty()));
        if title.as_deref().is_some_and(is_blacklisted) {
            debug!(%url, "Skipping blacklisted listing");
            continue;
        }

        let area_text = card
            .select(&area_sel)
            .map(clean_text)
            .find(|t| parse_area(t).is_ok());
        let image_urls = card
            .select(&image_sel)
            .filter_map(image_src)
            .filter_map(|src| absolutize(base, src))
            .collect();

        listings.push(RawListing {
            id,
            url,
            title,
            price_text: first_text(card, &price_sel),
            area_text,
            location: first_text(card, &location_sel),
            image_urls,
            ..Default::default()
        });
    }
    Ok(listings)
}

/// Fill gaps in `raw` from its detail page. Fields already present are kept.
pub fn enrich_from_detail(
    raw: &RawListing,
    html: &str,
    page_url: &str,
    selectors: &DetailSelectors,
) -> ParseResult<RawListing> {
    let base = Url::parse(page_url).map_err(|e| ParseError::Structure {
        url: page_url.to_string(),
        reason: format!("invalid page url: {e}"),
    })?;
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title_sel = selector(selectors.title, page_url)?;
    let price_sel = selector(selectors.price, page_url)?;
    let location_sel = selector(selectors.location, page_url)?;
    let description_sel = selector(selectors.description, page_url)?;
    let images_sel = selector(selectors.images, page_url)?;
    let row_sel = selector(selectors.attribute_row, page_url)?;
    let key_sel = selector(selectors.attribute_key, page_url)?;
    let value_sel = selector(selectors.attribute_value, page_url)?;

    let title = first_text(root, &title_sel).or_else(|| meta_content(&document, "og:title"));
    if title.is_none() && raw.title.is_none() {
        return Err(ParseError::Structure {
            url: page_url.to_string(),
            reason: "detail page has no title".to_string(),
        });
    }

    let mut enriched = raw.clone();
    if enriched.title.is_none() {
        enriched.title = title;
    }
    if enriched.price_text.is_none() {
        enriched.price_text = first_text(root, &price_sel);
    }
    if enriched.location.is_none() {
        enriched.location = first_text(root, &location_sel);
    }
    enriched.description = first_text(root, &description_sel)
        .or_else(|| meta_content(&document, "og:description"))
        .or_else(|| enriched.description.take());

    for row in root.select(&row_sel) {
        let key = first_text(row, &key_sel);
        let value = first_text(row, &value_sel);
        if let (Some(key), Some(value)) = (key, value) {
            let key = key.trim_end_matches(':').to_string();
            if enriched.area_text.is_none() && is_area_key(&key) && parse_area(&value).is_ok() {
                enriched.area_text = Some(value.clone());
            }
            enriched.attributes.insert(key, value);
        }
    }
    if enriched.area_text.is_none() {
        enriched.area_text = enriched.description.as_deref().and_then(area_in_text);
    }

    let mut images: Vec<String> = meta_content(&document, "og:image").into_iter().collect();
    images.extend(
        root.select(&images_sel)
            .filter_map(image_src)
            .filter_map(|src| absolutize(&base, src)),
    );
    for image in images {
        if !enriched.image_urls.contains(&image) {
            enriched.image_urls.push(image);
        }
    }

    Ok(enriched)
}

fn is_area_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    ["superficie", "área", "area", "metraje", "tamaño"]
        .iter()
        .any(|k| lower.contains(k))
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let css = format!("meta[property=\"{property}\"]");
    let sel = Selector::parse(&css).ok()?;
    document
        .select(&sel)
        .filter_map(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}
