use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Marketplace a listing was harvested from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    MercadoLibre,
    InfoCasas,
    Gallito,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::MercadoLibre, Source::InfoCasas, Source::Gallito];

    /// Stable lowercase key used in artifacts and the dedup file
    pub fn key(&self) -> &'static str {
        match self {
            Source::MercadoLibre => "mercadolibre",
            Source::InfoCasas => "infocasas",
            Source::Gallito => "gallito",
        }
    }

    /// Human-facing marketplace name
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::MercadoLibre => "MercadoLibre",
            Source::InfoCasas => "InfoCasas",
            Source::Gallito => "Gallito",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// ISO currency of an asking price
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "UYU")]
    Uyu,
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Uyu => "UYU",
            Currency::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Price {
    pub amount: Decimal,
    pub currency: Currency,
}

/// Canonical area unit. Everything is stored in square meters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AreaUnit {
    #[serde(rename = "m2")]
    SquareMeters,
}

/// Square meters in one hectare
pub const SQM_PER_HECTARE: i64 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Area {
    pub value: Decimal,
    pub unit: AreaUnit,
}

impl Area {
    pub fn square_meters(value: Decimal) -> Self {
        Self {
            value,
            unit: AreaUnit::SquareMeters,
        }
    }

    pub fn hectares(&self) -> Decimal {
        self.value / Decimal::from(SQM_PER_HECTARE)
    }
}

/// Listing data as pulled off a page, before normalization
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawListing {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub area_text: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub image_urls: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

/// Canonical land listing
///
/// Immutable once built, except for the one-way `posted_at` transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: String,
    pub source: Source,
    pub title: String,
    pub price: Price,
    pub area: Area,
    pub location: String,
    pub url: String,
    pub image_urls: Vec<String>,
    pub raw_attributes: BTreeMap<String, String>,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    posted_at: Option<DateTime<Utc>>,
}

impl Listing {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        source: Source,
        title: String,
        price: Price,
        area: Area,
        location: String,
        url: String,
        image_urls: Vec<String>,
        raw_attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            source,
            title,
            price,
            area,
            location,
            url,
            image_urls,
            raw_attributes,
            scraped_at: Utc::now(),
            posted_at: None,
        }
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }

    /// Record the delivery time. Returns false if it was already set.
    pub fn mark_posted(&mut self, at: DateTime<Utc>) -> bool {
        if self.posted_at.is_some() {
            return false;
        }
        self.posted_at = Some(at);
        true
    }

    /// Asking price divided by area, when area is non-zero
    pub fn price_per_sqm(&self) -> Option<Decimal> {
        if self.area.value.is_zero() {
            None
        } else {
            Some((self.price.amount / self.area.value).round_dp(2))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Listing {
        Listing::new(
            "MLU1".to_string(),
            Source::MercadoLibre,
            "Campo en Rocha".to_string(),
            Price {
                amount: Decimal::from(45_000),
                currency: Currency::Usd,
            },
            Area::square_meters(Decimal::from(35_000)),
            "Rocha".to_string(),
            "https://example.com/MLU-1".to_string(),
            vec![],
            BTreeMap::new(),
        )
    }

    #[test]
    fn posted_at_is_set_once() {
        let mut listing = sample();
        let first = Utc::now();
        assert!(listing.mark_posted(first));
        assert!(!listing.mark_posted(Utc::now()));
        assert_eq!(listing.posted_at(), Some(first));
    }

    #[test]
    fn hectares_and_price_per_sqm() {
        let listing = sample();
        assert_eq!(listing.area.hectares(), Decimal::new(35, 1));
        assert_eq!(listing.price_per_sqm(), Some(Decimal::new(129, 2)));
    }

    #[test]
    fn source_serializes_as_key() {
        for source in Source::ALL {
            assert_eq!(serde_json::to_string(&source).unwrap(), format!("\"{}\"", source.key()));
        }
        let json = serde_json::to_string(&Source::InfoCasas).unwrap();
        assert_eq!(json, "\"infocasas\"");
    }
}
