use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One monitored storefront listing, identified by its URL.
///
/// Created by an extractor from a search result page, with `in_stock`
/// defaulted to `false` until detail enrichment has had a look at the
/// product page. After enrichment the record is treated as immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub title: String,
    /// Listing price in whole currency units (NT$).
    pub price: u64,
    pub in_stock: bool,
    /// Product identity. Two listings with the same URL are the same product.
    pub url: String,
    pub seller: Option<String>,
    pub payment_methods: HashSet<String>,
}

/// Authoritative fields scraped from a product's own page, applied on top of
/// the summary listing by the detail enricher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailUpdate {
    pub title: Option<String>,
    pub in_stock: bool,
    pub seller: Option<String>,
    pub payment_methods: HashSet<String>,
    /// Preferred price from the secondary price endpoint when available,
    /// otherwise the detail-page price. `None` keeps the listing price.
    pub price: Option<u64>,
}

impl Product {
    pub fn new(title: impl Into<String>, price: u64, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            price,
            in_stock: false,
            url: url.into(),
            seller: None,
            payment_methods: HashSet::new(),
        }
    }

    /// Overwrite summary fields with the more authoritative detail data.
    pub fn apply_detail(&mut self, detail: DetailUpdate) {
        if let Some(title) = detail.title {
            self.title = title;
        }
        self.in_stock = detail.in_stock;
        self.seller = detail.seller;
        self.payment_methods = detail.payment_methods;
        if let Some(price) = detail.price {
            self.price = price;
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stock = if self.in_stock { "in stock" } else { "sold out" };
        write!(
            f,
            "Product(title='{}', price={}, {}, url='{}')",
            self.title, self.price, stock, self.url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_product_defaults_out_of_stock() {
        let product = Product::new("MGSD Wing Gundam", 1350, "https://example.com/item/1");
        assert!(!product.in_stock);
        assert!(product.seller.is_none());
        assert!(product.payment_methods.is_empty());
    }

    #[test]
    fn test_apply_detail_overwrites_fields() {
        let mut product = Product::new("summary title", 1350, "https://example.com/item/1");
        product.apply_detail(DetailUpdate {
            title: Some("detail title".to_string()),
            in_stock: true,
            seller: Some("shop123".to_string()),
            payment_methods: ["PW_COD".to_string()].into_iter().collect(),
            price: Some(1280),
        });

        assert_eq!(product.title, "detail title");
        assert!(product.in_stock);
        assert_eq!(product.seller.as_deref(), Some("shop123"));
        assert!(product.payment_methods.contains("PW_COD"));
        assert_eq!(product.price, 1280);
    }

    #[test]
    fn test_apply_detail_keeps_listing_price_when_absent() {
        let mut product = Product::new("title", 1350, "https://example.com/item/1");
        product.apply_detail(DetailUpdate {
            in_stock: true,
            ..Default::default()
        });
        assert_eq!(product.price, 1350);
        assert_eq!(product.title, "title");
    }

    #[test]
    fn test_display_shows_stock_status() {
        let mut product = Product::new("t", 10, "u");
        assert!(product.to_string().contains("sold out"));
        product.in_stock = true;
        assert!(product.to_string().contains("in stock"));
    }
}
