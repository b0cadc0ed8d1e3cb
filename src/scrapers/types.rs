use crate::models::{Listing, RawListing};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Search parameters for land scraping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    /// Department (region) slug to narrow the search, e.g. "rocha"
    pub department: Option<String>,
    /// Maximum asking price, in the listing's own currency
    pub max_price: Option<Decimal>,
    /// Minimum size in square meters
    pub min_area_sqm: Option<Decimal>,
}

impl SearchParams {
    /// Whether a normalized listing falls inside the price/area bounds
    pub fn matches(&self, listing: &Listing) -> bool {
        let price_ok = self.max_price.map_or(true, |max| listing.price.amount <= max);
        let area_ok = self
            .min_area_sqm
            .map_or(true, |min| listing.area.value >= min);
        price_ok && area_ok
    }

    pub(crate) fn department_slug(&self) -> Option<String> {
        self.department
            .as_deref()
            .map(|d| d.trim().to_lowercase().replace(' ', "-"))
            .filter(|d| !d.is_empty())
    }
}

/// One fetched result page
///
/// The page can be iterated any number of times; fetching it again yields a
/// fresh batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub page_number: u32,
    pub url: String,
    /// Name of the extraction strategy that matched
    pub strategy: &'static str,
    pub listings: Vec<RawListing>,
}

impl ListingPage {
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

impl IntoIterator for ListingPage {
    type Item = RawListing;
    type IntoIter = std::vec::IntoIter<RawListing>;

    fn into_iter(self) -> Self::IntoIter {
        self.listings.into_iter()
    }
}

/// Raw response body handed to extraction
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}
