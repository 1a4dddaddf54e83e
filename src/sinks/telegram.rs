use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

use super::{NotifyMeta, Sink};
use crate::models::Product;
use crate::utils::error::NotificationError;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Sends restock notifications through the Telegram Bot API.
pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn build_message(&self, product: &Product, meta: &NotifyMeta) -> String {
        // Taipei local time in the message body, matching the audience.
        let tz = FixedOffset::east_opt(8 * 3600).expect("static offset");
        let timestamp = Utc::now()
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M:%S %z");

        format!(
            "[{timestamp}]\n店家: {store}\n商品: {title}\n價格: {price}\n狀態: 有貨\n<a href=\"{url}\">點此查看商品頁面</a>",
            store = meta.source_label,
            title = product.title,
            price = product.price,
            url = product.url,
        )
    }
}

#[async_trait]
impl Sink for TelegramSink {
    async fn deliver(&self, product: &Product, meta: &NotifyMeta) -> Result<bool, NotificationError> {
        if self.bot_token.is_empty() || self.chat_id.is_empty() {
            return Err(NotificationError(
                "telegram bot token or chat id not configured".to_string(),
            ));
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": self.build_message(product, meta),
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError(format!("telegram request failed: {}", e)))?;

        let ok = response.status().is_success();
        if ok {
            info!(
                "sent telegram notification for '{}' ({})",
                product.title, meta.display_name
            );
        } else {
            error!(
                "telegram rejected notification for '{}': HTTP {}",
                product.title,
                response.status()
            );
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product() -> Product {
        let mut p = Product::new("MGSD 飛翼鋼彈", 1350, "https://www.ruten.com.tw/item/show?111");
        p.in_stock = true;
        p
    }

    fn meta() -> NotifyMeta {
        NotifyMeta {
            display_name: "飛翼鋼彈".to_string(),
            source_label: "露天拍賣".to_string(),
        }
    }

    #[test]
    fn test_message_contains_product_fields() {
        let sink = TelegramSink::new("token", "chat");
        let message = sink.build_message(&product(), &meta());

        assert!(message.contains("MGSD 飛翼鋼彈"));
        assert!(message.contains("1350"));
        assert!(message.contains("露天拍賣"));
        assert!(message.contains("href=\"https://www.ruten.com.tw/item/show?111\""));
        assert!(message.contains("有貨"));
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendMessage"))
            .and(body_partial_json(serde_json::json!({"chat_id": "chat", "parse_mode": "HTML"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = TelegramSink::new("token", "chat").with_api_base(server.uri());
        let result = sink.deliver(&product(), &meta()).await;
        assert!(matches!(result, Ok(true)));
    }

    #[tokio::test]
    async fn test_deliver_rejected_is_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let sink = TelegramSink::new("token", "chat").with_api_base(server.uri());
        // Rejection is still an attempt: Ok(false), not Err.
        let result = sink.deliver(&product(), &meta()).await;
        assert!(matches!(result, Ok(false)));
    }

    #[tokio::test]
    async fn test_unconfigured_sink_errors() {
        let sink = TelegramSink::new("", "");
        let result = sink.deliver(&product(), &meta()).await;
        assert!(result.is_err());
    }
}
