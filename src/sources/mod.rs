use async_trait::async_trait;

use crate::fetch::FetchError;
use crate::models::{DetailUpdate, Product};
use crate::utils::error::ExtractionError;

pub mod ruten;

pub use ruten::{RutenExtractor, RutenSource};

/// Raw page or API payload fetched from a storefront.
#[derive(Debug, Clone, Default)]
pub struct RawContent {
    pub body: String,
    /// Secondary payload fetched alongside the body, when the source has a
    /// more authoritative endpoint for part of the data (e.g. the Ruten
    /// price API). Absent or unparseable aux falls back to the body.
    pub aux: Option<String>,
}

impl RawContent {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            aux: None,
        }
    }
}

/// Fetches raw content from one storefront. Implementations own their
/// session resources (HTTP client, cookies); those are released by drop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch the search/listing page for a task's target.
    async fn fetch_listing(&self, target: &str) -> Result<RawContent, FetchError>;

    /// Fetch one product's own page (plus any secondary endpoints).
    async fn fetch_detail(&self, url: &str) -> Result<RawContent, FetchError>;
}

/// Turns raw content into product records. Site-specific field extraction
/// lives behind this seam.
#[cfg_attr(test, mockall::automock)]
pub trait Extractor: Send + Sync {
    /// Parse a listing page into partially populated products. `in_stock`
    /// stays false pending enrichment. Malformed items are dropped and
    /// logged, never abort the page.
    fn extract_products(&self, raw: &RawContent) -> Vec<Product>;

    /// Parse a product page into the authoritative detail fields.
    fn extract_detail(&self, raw: &RawContent) -> Result<DetailUpdate, ExtractionError>;
}
