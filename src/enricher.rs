use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fetch::RetryPolicy;
use crate::models::Product;
use crate::sources::{Extractor, Source};

/// Diagnostic counters for the enrichment stage. URLs, not titles, since the
/// URL is the product identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichStats {
    pub total_processed: usize,
    pub failed_to_scrape: Vec<String>,
    pub out_of_stock_after_enrich: Vec<String>,
}

/// Per-product detail fetch upgrading summary listings with authoritative
/// stock/seller/price/payment data.
///
/// Items are processed independently: a failed detail fetch marks that one
/// product out of stock and moves on, it never aborts the batch. Output has
/// one item per input item in the same order; ineligibility is always
/// expressed through `in_stock = false`, never by dropping.
pub struct DetailEnricher {
    source: Arc<dyn Source>,
    extractor: Arc<dyn Extractor>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl DetailEnricher {
    pub fn new(
        source: Arc<dyn Source>,
        extractor: Arc<dyn Extractor>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            extractor,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn enrich(
        &self,
        products: Vec<Product>,
        blacklisted_sellers: &HashSet<String>,
    ) -> (Vec<Product>, EnrichStats) {
        let mut stats = EnrichStats {
            total_processed: products.len(),
            ..Default::default()
        };

        // buffered() preserves input order while bounding in-flight fetches.
        let updated: Vec<(Product, bool)> = stream::iter(products)
            .map(|product| self.enrich_one(product, blacklisted_sellers))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut out = Vec::with_capacity(updated.len());
        for (product, failed) in updated {
            if failed {
                stats.failed_to_scrape.push(product.url.clone());
            } else if !product.in_stock {
                stats.out_of_stock_after_enrich.push(product.url.clone());
            }
            out.push(product);
        }

        info!(
            "enriched {} product pages ({} failed, {} out of stock)",
            stats.total_processed,
            stats.failed_to_scrape.len(),
            stats.out_of_stock_after_enrich.len()
        );
        (out, stats)
    }

    /// Returns the product plus a failed-to-scrape flag.
    async fn enrich_one(
        &self,
        mut product: Product,
        blacklisted_sellers: &HashSet<String>,
    ) -> (Product, bool) {
        let url = product.url.clone();
        let raw = match self.retry.run(|| self.source.fetch_detail(&url)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("detail fetch failed for {}: {}", url, err);
                product.in_stock = false;
                return (product, true);
            }
        };

        match self.extractor.extract_detail(&raw) {
            Ok(detail) => {
                product.apply_detail(detail);
                if product
                    .seller
                    .as_ref()
                    .is_some_and(|s| blacklisted_sellers.contains(s))
                {
                    // Cheap short-circuit so downstream checks need not run.
                    info!(
                        "'{}' sold by blacklisted seller {:?}, marking out of stock",
                        product.title, product.seller
                    );
                    product.in_stock = false;
                }
                (product, false)
            }
            Err(err) => {
                warn!("detail extraction failed for {}: {}", url, err);
                product.in_stock = false;
                (product, true)
            }
        }
    }
}
