//! Raw listing text to canonical typed fields.
//!
//! Prices accept Spanish and English thousands/decimal separators together
//! with the currency markers used on Uruguayan marketplaces (`U$S`, `US$`,
//! `USD`, `$U`, `UYU`, `$`, `€`). A bare amount is taken as USD, the currency
//! land is quoted in on these sites.
//!
//! Areas accept square meter and hectare tokens and are always stored in
//! square meters, using 1 ha = 10 000 m².

use crate::error::NormalizationError;
use crate::models::{Area, Currency, Listing, Price, RawListing, Source, SQM_PER_HECTARE};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Space-separated groups join only as whole thousands ("950 000")
    RE.get_or_init(|| Regex::new(r"\d[\d.,]*(?:[ \u{a0}]\d{3}\b[\d.,]*)*").expect("static regex"))
}

/// Cents rendered as a separate two-digit group after the amount
fn cents_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[ \u{a0}](\d{2})\b").expect("static regex"))
}

fn area_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\d[\d.,]*)\s*(hect[áa]reas?|has?|m²|m2|mts?2|mts?²|metros?\s+cuadrados?)",
        )
        .expect("static regex")
    })
}

/// Parse price text such as `"U$S 45.000"` into an amount and currency.
pub fn parse_price(text: &str) -> Result<Price, NormalizationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(NormalizationError::MissingPrice);
    }

    let currency = detect_currency(trimmed);
    let unparsable = || NormalizationError::UnparsablePrice(trimmed.to_string());
    let found = number_re().find(trimmed).ok_or_else(unparsable)?;
    let mut amount = parse_localized_number(found.as_str()).ok_or_else(unparsable)?;
    if amount.fract().is_zero() {
        if let Some(cents) = cents_re()
            .captures(&trimmed[found.end()..])
            .and_then(|caps| caps.get(1))
            .and_then(|m| Decimal::from_str(m.as_str()).ok())
        {
            amount += cents / Decimal::from(100);
        }
    }
    if amount <= Decimal::ZERO {
        return Err(unparsable());
    }

    Ok(Price { amount, currency })
}

fn detect_currency(text: &str) -> Currency {
    let lower = text.to_lowercase();
    if ["u$s", "us$", "usd", "u$d", "dólares", "dolares"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        Currency::Usd
    } else if lower.contains('€') || lower.contains("eur") {
        Currency::Eur
    } else if lower.contains("$u") || lower.contains("uyu") || lower.contains("pesos") || lower.contains('$') {
        Currency::Uyu
    } else {
        Currency::Usd
    }
}

/// Parse area text such as `"3,5 ha"` or `"1.200 m²"` into square meters.
///
/// Only explicit area units count; a bare "500 metros" is a distance.
/// Ranges (`"2 ha - 5 ha"`) keep their lower bound.
pub fn parse_area(text: &str) -> Result<Area, NormalizationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(NormalizationError::MissingArea);
    }
    area_matches(trimmed)
        .next()
        .map(Area::square_meters)
        .ok_or_else(|| NormalizationError::UnparsableArea(trimmed.to_string()))
}

/// Largest area mentioned anywhere in free text such as a description.
///
/// A lot description often names a building footprint too ("casa de 120 m2
/// en 3 hectáreas"); the lot is the larger figure.
pub fn area_in_text(text: &str) -> Option<String> {
    let largest = area_matches(text).max()?;
    Some(format!("{largest} m²"))
}

/// Every area token in `text`, in square meters
fn area_matches(text: &str) -> impl Iterator<Item = Decimal> + '_ {
    area_re().captures_iter(text).filter_map(move |caps| {
        let whole = caps.get(0)?.end();
        // "3 habitaciones" must not read as hectares
        if text[whole..].chars().next().is_some_and(char::is_alphabetic) {
            return None;
        }
        let value = parse_localized_number(caps.get(1)?.as_str()).filter(|v| *v > Decimal::ZERO)?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        let square_meters = if unit.starts_with('h') {
            value * Decimal::from(SQM_PER_HECTARE)
        } else {
            value
        };
        Some(square_meters.normalize())
    })
}

/// Interpret `.` and `,` as thousands or decimal separators.
///
/// With both present, the rightmost one is the decimal separator. With only
/// one kind present, it groups thousands when it appears more than once or is
/// followed by exactly three digits; otherwise it is the decimal separator.
fn parse_localized_number(raw: &str) -> Option<Decimal> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let digits = digits.trim_end_matches(['.', ',']);
    if digits.is_empty() {
        return None;
    }

    let canonical = match (digits.rfind('.'), digits.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => digits.replace(',', ""),
        (Some(_), Some(_)) => digits.replace('.', "").replace(',', "."),
        (Some(_), None) => resolve_single_separator(digits, '.'),
        (None, Some(_)) => resolve_single_separator(digits, ','),
        (None, None) => digits.to_string(),
    };

    Decimal::from_str(&canonical).ok()
}

fn resolve_single_separator(digits: &str, sep: char) -> String {
    let parts: Vec<&str> = digits.split(sep).collect();
    let groups_thousands = parts.len() > 2
        || (parts.len() == 2 && parts[1].len() == 3 && !parts[0].is_empty() && parts[0] != "0");
    if groups_thousands {
        parts.concat()
    } else {
        digits.replacen(sep, ".", 1)
    }
}

/// Build a canonical listing, or explain why it cannot be built.
pub fn normalize(source: Source, raw: &RawListing) -> Result<Listing, NormalizationError> {
    if raw.id.trim().is_empty() {
        return Err(NormalizationError::MissingField("id"));
    }
    if raw.url.trim().is_empty() {
        return Err(NormalizationError::MissingField("url"));
    }
    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(NormalizationError::MissingField("title"))?;

    let price = match raw.price_text.as_deref() {
        Some(text) => parse_price(text)?,
        None => return Err(NormalizationError::MissingPrice),
    };
    let area = match raw.area_text.as_deref() {
        Some(text) => parse_area(text)?,
        None => return Err(NormalizationError::MissingArea),
    };

    let mut image_urls: Vec<String> = Vec::with_capacity(raw.image_urls.len());
    for url in &raw.image_urls {
        if (url.starts_with("http://") || url.starts_with("https://")) && !image_urls.contains(url) {
            image_urls.push(url.clone());
        }
    }

    let mut raw_attributes = raw.attributes.clone();
    if let Some(description) = raw.description.as_deref().filter(|d| !d.trim().is_empty()) {
        raw_attributes.insert("description".to_string(), description.trim().to_string());
    }

    Ok(Listing::new(
        raw.id.trim().to_string(),
        source,
        title.to_string(),
        price,
        area,
        raw.location.as_deref().map(str::trim).unwrap_or_default().to_string(),
        raw.url.trim().to_string(),
        image_urls,
        raw_attributes,
    ))
}

/// A raw listing that was dropped, with the reason.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub listing_id: String,
    pub url: String,
    pub error: NormalizationError,
}

/// Normalize a batch. Rejections are logged and returned, never fatal.
pub fn normalize_batch(source: Source, raws: &[RawListing]) -> (Vec<Listing>, Vec<Rejected>) {
    let mut listings = Vec::with_capacity(raws.len());
    let mut rejected = Vec::new();

    for raw in raws {
        match normalize(source, raw) {
            Ok(listing) => listings.push(listing),
            Err(error) => {
                warn!(source = %source, listing_id = %raw.id, url = %raw.url, %error, "Dropping listing that failed normalization");
                rejected.push(Rejected {
                    listing_id: raw.id.clone(),
                    url: raw.url.clone(),
                    error,
                });
            }
        }
    }

    (listings, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_price_with_dot_thousands() {
        let price = parse_price("U$S 45.000").unwrap();
        assert_eq!(price.amount, Decimal::from(45_000));
        assert_eq!(price.currency, Currency::Usd);
    }

    #[test]
    fn price_separators_and_currencies() {
        let cases = [
            ("US$ 1.250.000", 1_250_000, Currency::Usd),
            ("USD 85,000", 85_000, Currency::Usd),
            ("$ 3.500.000", 3_500_000, Currency::Uyu),
            ("$U 950 000", 950_000, Currency::Uyu),
            ("€ 12.000", 12_000, Currency::Eur),
            ("120000", 120_000, Currency::Usd),
        ];
        for (text, amount, currency) in cases {
            let price = parse_price(text).unwrap();
            assert_eq!(price.amount, Decimal::from(amount), "{text}");
            assert_eq!(price.currency, currency, "{text}");
        }
    }

    #[test]
    fn price_with_decimal_part() {
        let price = parse_price("U$S 1.234,50").unwrap();
        assert_eq!(price.amount, Decimal::new(123_450, 2));
        let price = parse_price("USD 1,234.50").unwrap();
        assert_eq!(price.amount, Decimal::new(123_450, 2));
    }

    #[test]
    fn unparsable_prices() {
        assert_eq!(parse_price("  "), Err(NormalizationError::MissingPrice));
        assert!(matches!(
            parse_price("Consultar"),
            Err(NormalizationError::UnparsablePrice(_))
        ));
        assert!(matches!(
            parse_price("U$S 0"),
            Err(NormalizationError::UnparsablePrice(_))
        ));
    }

    #[test]
    fn hectares_convert_to_square_meters() {
        let area = parse_area("3,5 ha").unwrap();
        assert_eq!(area.value, Decimal::from(35_000));
        assert_eq!(area.hectares(), Decimal::new(35, 1));

        assert_eq!(parse_area("12 hectáreas").unwrap().value, Decimal::from(120_000));
        assert_eq!(parse_area("1 Has").unwrap().value, Decimal::from(10_000));
    }

    #[test]
    fn square_meter_tokens() {
        assert_eq!(parse_area("1.200 m²").unwrap().value, Decimal::from(1_200));
        assert_eq!(parse_area("Superficie: 800 m2").unwrap().value, Decimal::from(800));
        assert_eq!(parse_area("600 mts2").unwrap().value, Decimal::from(600));
        assert_eq!(
            parse_area("450 metros cuadrados").unwrap().value,
            Decimal::from(450)
        );
        assert_eq!(parse_area("2 ha - 5 ha").unwrap().value, Decimal::from(20_000));
    }

    #[test]
    fn area_ignores_unrelated_words() {
        assert!(matches!(
            parse_area("3 habitaciones"),
            Err(NormalizationError::UnparsableArea(_))
        ));
        assert_eq!(
            parse_area("3 habitaciones, 700 m²").unwrap().value,
            Decimal::from(700)
        );
        assert!(matches!(
            parse_area("1500"),
            Err(NormalizationError::UnparsableArea(_))
        ));
    }

    #[test]
    fn distances_are_not_areas() {
        assert!(matches!(
            parse_area("a 300 metros del mar"),
            Err(NormalizationError::UnparsableArea(_))
        ));
        assert!(parse_area("500 mts de la playa").is_err());
        assert_eq!(
            parse_area("Campo a 500 metros de la ruta 8, 12 hectáreas").unwrap().value,
            Decimal::from(120_000)
        );
    }

    #[test]
    fn free_text_prefers_the_lot_area() {
        assert_eq!(
            area_in_text("Casa de 120 m2 sobre 3 hectáreas, a 800 metros del arroyo").as_deref(),
            Some("30000 m²")
        );
        assert_eq!(area_in_text("A 500 metros de la ruta, consultar"), None);
    }

    #[test]
    fn separate_cents_group() {
        let price = parse_price("US$ 45.000 50").unwrap();
        assert_eq!(price.amount, Decimal::new(4_500_050, 2));
        assert_eq!(parse_price("$U 1 250 000").unwrap().amount, Decimal::from(1_250_000));
        assert_eq!(parse_price("U$S 45.000 m²").unwrap().amount, Decimal::from(45_000));
    }

    fn raw(id: &str, price: Option<&str>, area: Option<&str>) -> RawListing {
        RawListing {
            id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: Some("Terreno en Maldonado".to_string()),
            price_text: price.map(str::to_string),
            area_text: area.map(str::to_string),
            location: Some(" Maldonado ".to_string()),
            description: Some("Con vista al mar".to_string()),
            image_urls: vec![
                "https://img/1.jpg".to_string(),
                "https://img/1.jpg".to_string(),
                "data:image/png;base64,AAAA".to_string(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn normalize_builds_canonical_listing() {
        let listing = normalize(Source::InfoCasas, &raw("1", Some("U$S 45.000"), Some("3,5 ha"))).unwrap();
        assert_eq!(listing.price.amount, Decimal::from(45_000));
        assert_eq!(listing.area.value, Decimal::from(35_000));
        assert_eq!(listing.location, "Maldonado");
        assert_eq!(listing.image_urls, vec!["https://img/1.jpg".to_string()]);
        assert_eq!(
            listing.raw_attributes.get("description").map(String::as_str),
            Some("Con vista al mar")
        );
        assert!(listing.posted_at().is_none());
    }

    #[test]
    fn batch_drops_listing_without_price() {
        let raws = vec![
            raw("1", Some("U$S 10.000"), Some("500 m²")),
            raw("2", None, Some("500 m²")),
            raw("3", Some("U$S 20.000"), Some("1 ha")),
        ];
        let (listings, rejected) = normalize_batch(Source::Gallito, &raws);
        assert_eq!(listings.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].listing_id, "2");
        assert_eq!(rejected[0].error, NormalizationError::MissingPrice);
    }
}
