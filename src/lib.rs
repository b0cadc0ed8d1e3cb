pub mod artifacts;
pub mod config;
pub mod delivery;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod scrapers;
pub mod store;

pub use error::{DeliveryError, ErrorKind, NormalizationError, ParseError, StoreError};
pub use models::{Area, Currency, Listing, Price, RawListing, Source};
pub use pipeline::{Pipeline, RunReport, RunStatus};
pub use store::DedupStore;
