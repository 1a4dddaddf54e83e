use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Product;
use crate::utils::error::NotificationError;

pub mod telegram;

pub use telegram::TelegramSink;

/// Presentation metadata attached to a delivery, taken from the task config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyMeta {
    pub display_name: String,
    pub source_label: String,
}

/// Delivers one notification about a purchasable product.
///
/// `Ok(true)`/`Ok(false)` both mean an attempt was made (the cooldown store
/// gets stamped either way); `Err` means the transport failed before an
/// attempt, leaving the product eligible next cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, product: &Product, meta: &NotifyMeta) -> Result<bool, NotificationError>;
}
