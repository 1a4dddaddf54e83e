use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Product;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Every keyword must appear in the title (case-insensitive substring).
    pub keywords: Vec<String>,
    /// No excluded keyword may appear in the title.
    pub exclude_keywords: Vec<String>,
}

/// Diagnostic counters for the keyword stage. Rejected lists carry product
/// URLs (the identity), first applicable reason only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordStats {
    pub total_processed: usize,
    pub rejected_keyword_mismatch: Vec<String>,
    pub rejected_excluded_keyword: Vec<String>,
}

/// Stage 1 filter: required/excluded substring matching on the title.
///
/// An empty keyword list keeps everything; that is almost always a task
/// configuration mistake, so it is logged as a warning. Order is stable.
pub fn apply(products: Vec<Product>, config: &KeywordConfig) -> (Vec<Product>, KeywordStats) {
    let mut stats = KeywordStats {
        total_processed: products.len(),
        ..Default::default()
    };

    if config.keywords.is_empty() {
        warn!("keyword filter has no keywords configured, keeping all products");
        return (products, stats);
    }

    let keywords: Vec<String> = config.keywords.iter().map(|k| k.to_lowercase()).collect();
    let excluded: Vec<String> = config
        .exclude_keywords
        .iter()
        .map(|k| k.to_lowercase())
        .collect();

    let mut kept = Vec::with_capacity(products.len());
    for product in products {
        let title = product.title.to_lowercase();

        if !keywords.iter().all(|k| title.contains(k.as_str())) {
            stats.rejected_keyword_mismatch.push(product.url);
            continue;
        }

        if excluded.iter().any(|k| title.contains(k.as_str())) {
            stats.rejected_excluded_keyword.push(product.url);
            continue;
        }

        kept.push(product);
    }

    (kept, stats)
}
