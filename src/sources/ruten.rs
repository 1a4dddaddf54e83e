use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{Extractor, RawContent, Source};
use crate::fetch::FetchError;
use crate::models::{DetailUpdate, Product};
use crate::utils::error::ExtractionError;

const SEARCH_API: &str = "https://rtapi.ruten.com.tw/api/search/v3/index.php/core/prod";
const DETAILS_API: &str = "https://rtapi.ruten.com.tw/api/prod/v2/index.php/prod";
const PRICE_API: &str = "https://rapi.ruten.com.tw/api/items/v2/list";
const ITEM_BASE: &str = "https://www.ruten.com.tw/item/show";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

fn rt_context_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)RT\.context = (\{.*?\});").expect("static regex"))
}

fn payment_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bPW_[A-Z_]+\b").expect("static regex"))
}

/// Ruten storefront fetcher using the JSON search APIs instead of a browser
/// session; a search is two calls (id list, then details) and a detail fetch
/// is the product page plus the secondary price endpoint.
pub struct RutenSource {
    client: Client,
    timeout: Duration,
    api_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchIdPayload {
    #[serde(rename = "Rows", default)]
    rows: Vec<SearchRow>,
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    #[serde(rename = "Id")]
    id: String,
}

impl RutenSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
            api_base: None,
        }
    }

    /// Point every endpoint at a test server instead of ruten.com.tw.
    #[cfg(test)]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    fn endpoint(&self, real: &str, test_path: &str) -> String {
        match &self.api_base {
            Some(base) => format!("{}{}", base, test_path),
            None => real.to_string(),
        }
    }

    async fn get_text(&self, url: &str, query: &[(String, String)]) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("accept", "application/json, text/plain, */*")
            .header("user-agent", USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    /// Secondary authoritative price payload; any failure here degrades to
    /// the detail-page price rather than failing the detail fetch.
    async fn fetch_price_payload(&self, product_id: &str) -> Option<String> {
        let url = self.endpoint(PRICE_API, "/api/items/v2/list");
        let query = vec![
            ("gno".to_string(), product_id.to_string()),
            ("level".to_string(), "simple".to_string()),
        ];
        match self.get_text(&url, &query).await {
            Ok(body) => Some(body),
            Err(err) => {
                warn!("price API unavailable for {}: {}", product_id, err);
                None
            }
        }
    }
}

#[async_trait]
impl Source for RutenSource {
    async fn fetch_listing(&self, target: &str) -> Result<RawContent, FetchError> {
        let parsed = Url::parse(target)
            .map_err(|e| FetchError::Other(format!("invalid search target '{}': {}", target, e)))?;

        let mut query: Vec<(String, String)> = vec![
            ("type".to_string(), "direct".to_string()),
            ("sort".to_string(), "rnk/dc".to_string()),
            ("limit".to_string(), "100".to_string()),
            ("offset".to_string(), "1".to_string()),
        ];
        for (k, v) in parsed.query_pairs() {
            query.retain(|(existing, _)| existing != &k);
            query.push((k.into_owned(), v.into_owned()));
        }

        let search_url = self.endpoint(SEARCH_API, "/api/search/v3/index.php/core/prod");
        let id_body = self.get_text(&search_url, &query).await?;
        let ids: SearchIdPayload = serde_json::from_str(&id_body)
            .map_err(|e| FetchError::Other(format!("unparseable search payload: {}", e)))?;

        if ids.rows.is_empty() {
            // Empty-but-successful: the caller decides what no products mean.
            debug!("search API returned no products for {}", target);
            return Ok(RawContent::new("[]"));
        }

        let joined: Vec<&str> = ids.rows.iter().map(|r| r.id.as_str()).collect();
        let details_url = self.endpoint(DETAILS_API, "/api/prod/v2/index.php/prod");
        let details_body = self
            .get_text(&details_url, &[("id".to_string(), joined.join(","))])
            .await?;

        Ok(RawContent::new(details_body))
    }

    async fn fetch_detail(&self, url: &str) -> Result<RawContent, FetchError> {
        let page_url = match &self.api_base {
            Some(base) => {
                let id = url.split('?').nth(1).unwrap_or_default();
                format!("{}/item/show?{}", base, id)
            }
            None => url.to_string(),
        };
        let body = self.get_text(&page_url, &[]).await?;

        // Product id is the query string of the canonical item URL.
        let aux = match url.split('?').nth(1).filter(|id| !id.is_empty()) {
            Some(id) => self.fetch_price_payload(id).await,
            None => None,
        };

        Ok(RawContent { body, aux })
    }
}

/// Field extraction for Ruten payloads.
#[derive(Default)]
pub struct RutenExtractor;

#[derive(Debug, Deserialize)]
struct DetailsRow {
    #[serde(rename = "ProdId")]
    prod_id: Option<serde_json::Value>,
    #[serde(rename = "ProdName")]
    prod_name: Option<String>,
    #[serde(rename = "PriceRange", default)]
    price_range: Vec<serde_json::Value>,
    #[serde(rename = "SellerId")]
    seller_id: Option<String>,
    #[serde(rename = "Payment")]
    payment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PricePayload {
    #[serde(default)]
    data: Vec<PriceEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    goods_price_range: Option<PriceRange>,
}

#[derive(Debug, Deserialize)]
struct PriceRange {
    min: Option<u64>,
}

impl RutenExtractor {
    pub fn new() -> Self {
        Self
    }

    fn parse_row(&self, row: DetailsRow) -> Option<Product> {
        let title = row.prod_name?;
        let id = match row.prod_id? {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        // Listing prices arrive in cents. A malformed price drops the item
        // rather than reporting 0.
        let price = row
            .price_range
            .first()
            .and_then(|v| v.as_u64())
            .map(|cents| cents / 100)?;

        let mut product = Product::new(title, price, format!("{}?{}", ITEM_BASE, id));
        product.seller = row.seller_id;
        product.payment_methods = row
            .payment
            .unwrap_or_default()
            .split(',')
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        Some(product)
    }

    fn detail_price(&self, raw: &RawContent, item: &serde_json::Value) -> Option<u64> {
        if let Some(aux) = &raw.aux {
            if let Ok(payload) = serde_json::from_str::<PricePayload>(aux) {
                if let Some(min) = payload
                    .data
                    .first()
                    .and_then(|e| e.goods_price_range.as_ref())
                    .and_then(|r| r.min)
                {
                    return Some(min);
                }
            }
            warn!("could not parse secondary price payload, using page price");
        }

        match item.get("directPrice") {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    /// Older detail pages omit the payment list from RT.context; the method
    /// icons in the payment table carry `PW_*` classes instead.
    fn payment_methods_from_page(&self, body: &str) -> HashSet<String> {
        let document = Html::parse_document(body);
        let selector = Selector::parse(r#"[class*="PW_"]"#).expect("static selector");
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("class"))
            .flat_map(|classes| {
                payment_class_re()
                    .find_iter(classes)
                    .map(|m| m.as_str().to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Extractor for RutenExtractor {
    fn extract_products(&self, raw: &RawContent) -> Vec<Product> {
        let rows: Vec<DetailsRow> = match serde_json::from_str(&raw.body) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("unparseable details payload: {}", err);
                return Vec::new();
            }
        };

        let total = rows.len();
        let products: Vec<Product> = rows.into_iter().filter_map(|r| self.parse_row(r)).collect();
        if products.len() < total {
            warn!("dropped {} malformed listing rows", total - products.len());
        }
        info!("extracted {} products from search results", products.len());
        products
    }

    fn extract_detail(&self, raw: &RawContent) -> Result<DetailUpdate, ExtractionError> {
        let captures = rt_context_re()
            .captures(&raw.body)
            .ok_or_else(|| ExtractionError("RT.context not found in product page".to_string()))?;
        let context: serde_json::Value = serde_json::from_str(&captures[1])
            .map_err(|e| ExtractionError(format!("RT.context is not valid JSON: {}", e)))?;

        let item = context.get("item").cloned().unwrap_or_default();
        let seller = context
            .pointer("/seller/nick")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(DetailUpdate {
            title: item
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            in_stock: item
                .get("remainNum")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                > 0,
            seller,
            payment_methods: {
                let from_context: HashSet<String> = item
                    .get("payment")
                    .and_then(|v| v.as_array())
                    .map(|methods| {
                        methods
                            .iter()
                            .filter_map(|m| m.as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if from_context.is_empty() {
                    self.payment_methods_from_page(&raw.body)
                } else {
                    from_context
                }
            },
            price: self.detail_price(raw, &item),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn details_json() -> &'static str {
        r#"[
            {"ProdId": "111", "ProdName": "MGSD 飛翼鋼彈", "PriceRange": [135000, 150000],
             "StockStatus": 1, "SellerId": "seller1", "Payment": "CREDIT_CARD,PW_SEVEN_COD"},
            {"ProdId": "222", "ProdName": "MGSD 飛翼鋼彈 水貼", "PriceRange": [15000, 15000],
             "StockStatus": 0, "SellerId": "seller2", "Payment": "PW_FAMILY_COD"}
        ]"#
    }

    fn detail_page() -> &'static str {
        r#"<html><body><script>RT.context = {
            "item": {"no": "111", "name": "MGSD 飛翼鋼彈 現貨", "remainNum": 5,
                     "directPrice": 1400, "payment": ["PW_SEVEN_COD", "PW_FAMILY_COD"]},
            "seller": {"nick": "seller1"}
        };</script></body></html>"#
    }

    #[test]
    fn test_extract_products() {
        let extractor = RutenExtractor::new();
        let products = extractor.extract_products(&RawContent::new(details_json()));

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].title, "MGSD 飛翼鋼彈");
        assert_eq!(products[0].price, 1350);
        assert_eq!(products[0].url, "https://www.ruten.com.tw/item/show?111");
        assert_eq!(products[0].seller.as_deref(), Some("seller1"));
        assert!(products[0].payment_methods.contains("PW_SEVEN_COD"));
        // Stock is decided by enrichment, not the search payload.
        assert!(!products[0].in_stock);
        assert_eq!(products[1].price, 150);
    }

    #[test]
    fn test_malformed_price_drops_item() {
        let extractor = RutenExtractor::new();
        let body = r#"[
            {"ProdId": "1", "ProdName": "ok", "PriceRange": [10000]},
            {"ProdId": "2", "ProdName": "bad price", "PriceRange": ["NT$???"]},
            {"ProdId": "3", "ProdName": "no price", "PriceRange": []}
        ]"#;
        let products = extractor.extract_products(&RawContent::new(body));

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].title, "ok");
        assert_eq!(products[0].price, 100);
    }

    #[test]
    fn test_unparseable_body_extracts_nothing() {
        let extractor = RutenExtractor::new();
        assert!(extractor
            .extract_products(&RawContent::new("<html>maintenance</html>"))
            .is_empty());
    }

    #[test]
    fn test_extract_detail_from_rt_context() {
        let extractor = RutenExtractor::new();
        let detail = extractor
            .extract_detail(&RawContent::new(detail_page()))
            .unwrap();

        assert_eq!(detail.title.as_deref(), Some("MGSD 飛翼鋼彈 現貨"));
        assert!(detail.in_stock);
        assert_eq!(detail.seller.as_deref(), Some("seller1"));
        assert!(detail.payment_methods.contains("PW_FAMILY_COD"));
        // No aux payload: falls back to the page's direct price.
        assert_eq!(detail.price, Some(1400));
    }

    #[test]
    fn test_detail_prefers_secondary_price() {
        let extractor = RutenExtractor::new();
        let raw = RawContent {
            body: detail_page().to_string(),
            aux: Some(r#"{"data": [{"goods_price_range": {"min": 999, "max": 2000}}]}"#.to_string()),
        };
        let detail = extractor.extract_detail(&raw).unwrap();
        assert_eq!(detail.price, Some(999));
    }

    #[test]
    fn test_detail_bad_aux_falls_back_to_page_price() {
        let extractor = RutenExtractor::new();
        let raw = RawContent {
            body: detail_page().to_string(),
            aux: Some("not json".to_string()),
        };
        let detail = extractor.extract_detail(&raw).unwrap();
        assert_eq!(detail.price, Some(1400));
    }

    #[test]
    fn test_missing_rt_context_is_extraction_error() {
        let extractor = RutenExtractor::new();
        let result = extractor.extract_detail(&RawContent::new("<html>empty</html>"));
        assert!(result.is_err());
    }

    #[test]
    fn test_payment_methods_fall_back_to_page_icons() {
        let extractor = RutenExtractor::new();
        let body = r#"<html><body>
            <script>RT.context = {"item": {"name": "x", "remainNum": 1}};</script>
            <div class="payment-icon PW_SEVEN_COD"></div>
            <div class="payment-icon PW_CREDIT_CARD_INSTALLMENT"></div>
        </body></html>"#;
        let detail = extractor.extract_detail(&RawContent::new(body)).unwrap();

        assert!(detail.payment_methods.contains("PW_SEVEN_COD"));
        assert!(detail.payment_methods.contains("PW_CREDIT_CARD_INSTALLMENT"));
    }

    #[test]
    fn test_zero_remain_num_is_out_of_stock() {
        let extractor = RutenExtractor::new();
        let body = r#"<script>RT.context = {"item": {"remainNum": 0}};</script>"#;
        let detail = extractor.extract_detail(&RawContent::new(body)).unwrap();
        assert!(!detail.in_stock);
    }

    #[tokio::test]
    async fn test_fetch_listing_two_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search/v3/index.php/core/prod"))
            .and(query_param("q", "mgsd"))
            .and(query_param("type", "direct"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Rows": [{"Id": "111"}, {"Id": "222"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/prod/v2/index.php/prod"))
            .and(query_param("id", "111,222"))
            .respond_with(ResponseTemplate::new(200).set_body_string(details_json()))
            .expect(1)
            .mount(&server)
            .await;

        let source = RutenSource::new(Duration::from_secs(5)).with_api_base(server.uri());
        let raw = source
            .fetch_listing("https://www.ruten.com.tw/find/?q=mgsd")
            .await
            .unwrap();

        let products = RutenExtractor::new().extract_products(&raw);
        assert_eq!(products.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_listing_empty_rows_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search/v3/index.php/core/prod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"Rows": []})))
            .mount(&server)
            .await;

        let source = RutenSource::new(Duration::from_secs(5)).with_api_base(server.uri());
        let raw = source
            .fetch_listing("https://www.ruten.com.tw/find/?q=nothing")
            .await
            .unwrap();
        assert!(RutenExtractor::new().extract_products(&raw).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_detail_carries_price_aux() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/show"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_page()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/items/v2/list"))
            .and(query_param("gno", "111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"goods_price_range": {"min": 1280, "max": 1500}}]
            })))
            .mount(&server)
            .await;

        let source = RutenSource::new(Duration::from_secs(5)).with_api_base(server.uri());
        let raw = source
            .fetch_detail("https://www.ruten.com.tw/item/show?111")
            .await
            .unwrap();

        assert!(raw.aux.is_some());
        let detail = RutenExtractor::new().extract_detail(&raw).unwrap();
        assert_eq!(detail.price, Some(1280));
    }

    #[tokio::test]
    async fn test_fetch_detail_price_api_down_degrades() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/show"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_page()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/items/v2/list"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = RutenSource::new(Duration::from_secs(5)).with_api_base(server.uri());
        let raw = source
            .fetch_detail("https://www.ruten.com.tw/item/show?111")
            .await
            .unwrap();

        assert!(raw.aux.is_none());
        let detail = RutenExtractor::new().extract_detail(&raw).unwrap();
        assert_eq!(detail.price, Some(1400));
    }

    #[tokio::test]
    async fn test_search_error_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = RutenSource::new(Duration::from_secs(5)).with_api_base(server.uri());
        let result = source
            .fetch_listing("https://www.ruten.com.tw/find/?q=mgsd")
            .await;
        assert!(result.is_err());
    }
}
