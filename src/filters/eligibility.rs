use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Product;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EligibilityConfig {
    pub max_price: Option<u64>,
    pub min_price: Option<u64>,
    pub blacklisted_sellers: HashSet<String>,
    /// Empty means any payment method is acceptable. A non-empty set with no
    /// intersection rejects. Default task configs rely on this asymmetry.
    pub acceptable_payment_methods: HashSet<String>,
}

/// Diagnostic counters for the eligibility stage, one bucket per predicate.
/// Each rejected URL lands in the bucket of the first failing predicate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EligibilityStats {
    pub total_processed: usize,
    pub kept: Vec<String>,
    pub out_of_stock: Vec<String>,
    pub rejected_price: Vec<String>,
    pub rejected_seller: Vec<String>,
    pub rejected_payment: Vec<String>,
}

/// Stage 2 filter: stock, price bounds, seller blacklist, payment methods,
/// checked in that order. Returns zero, one, or many products; callers must
/// not assume a single winner.
pub fn apply(products: Vec<Product>, config: &EligibilityConfig) -> (Vec<Product>, EligibilityStats) {
    let mut stats = EligibilityStats {
        total_processed: products.len(),
        ..Default::default()
    };

    let mut kept = Vec::with_capacity(products.len());
    for product in products {
        if !product.in_stock {
            stats.out_of_stock.push(product.url);
            continue;
        }

        if config.max_price.is_some_and(|max| product.price > max) {
            debug!(
                "'{}' in stock but price {} exceeds cap {:?}",
                product.title, product.price, config.max_price
            );
            stats.rejected_price.push(product.url);
            continue;
        }

        if config.min_price.is_some_and(|min| product.price < min) {
            stats.rejected_price.push(product.url);
            continue;
        }

        if product
            .seller
            .as_ref()
            .is_some_and(|s| config.blacklisted_sellers.contains(s))
        {
            stats.rejected_seller.push(product.url);
            continue;
        }

        if !config.acceptable_payment_methods.is_empty()
            && product
                .payment_methods
                .is_disjoint(&config.acceptable_payment_methods)
        {
            stats.rejected_payment.push(product.url);
            continue;
        }

        stats.kept.push(product.url.clone());
        kept.push(product);
    }

    (kept, stats)
}
