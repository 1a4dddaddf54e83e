use std::collections::HashSet;
use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetch::RetryPolicy;
use crate::filters::{EligibilityConfig, KeywordConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub watcher: WatcherConfig,
    pub telegram: TelegramConfig,
    pub metrics: MetricsConfig,
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds to sleep after the slowest task of a cycle finishes.
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Concurrent detail-page fetches per task.
    pub enrich_concurrency: usize,
    /// Concurrent notification deliveries per task. Kept small and
    /// independent of the enrichment bound.
    pub notify_concurrency: usize,
    /// Default notification cooldown window, overridable per task.
    pub cooldown_secs: u64,
    /// Sellers blacklisted for every task.
    #[serde(default)]
    pub blacklisted_sellers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub endpoint: String,
}

/// One watch: a search target plus the constraints a listing must satisfy
/// before a notification goes out. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default = "default_source")]
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub max_price: Option<u64>,
    #[serde(default)]
    pub min_price: Option<u64>,
    #[serde(default)]
    pub blacklisted_sellers: Vec<String>,
    #[serde(default)]
    pub acceptable_payment_methods: Vec<String>,
    /// Overrides `watcher.cooldown_secs` for this task when set.
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default = "default_sink")]
    pub sink: String,
    /// Human-readable name used in notifications; defaults to `name`.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_source_label")]
    pub source_label: String,
}

fn default_source() -> String {
    "ruten".to_string()
}

fn default_sink() -> String {
    "telegram".to_string()
}

fn default_source_label() -> String {
    "露天拍賣".to_string()
}

impl TaskConfig {
    pub fn keyword_config(&self) -> KeywordConfig {
        KeywordConfig {
            keywords: self.keywords.clone(),
            exclude_keywords: self.exclude_keywords.clone(),
        }
    }

    /// Effective seller blacklist is the union of the global and per-task
    /// lists.
    pub fn eligibility_config(&self, global_blacklist: &[String]) -> EligibilityConfig {
        EligibilityConfig {
            max_price: self.max_price,
            min_price: self.min_price,
            blacklisted_sellers: self.effective_blacklist(global_blacklist),
            acceptable_payment_methods: self
                .acceptable_payment_methods
                .iter()
                .cloned()
                .collect(),
        }
    }

    pub fn effective_blacklist(&self, global_blacklist: &[String]) -> HashSet<String> {
        global_blacklist
            .iter()
            .chain(self.blacklisted_sellers.iter())
            .cloned()
            .collect()
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

impl WatcherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "PLAMO_"
            .add_source(Environment::with_prefix("PLAMO").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watcher.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Watcher poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.watcher.max_retries == 0 {
            return Err(ConfigError::Message(
                "Watcher max_retries must be greater than 0".into(),
            ));
        }

        if self.watcher.enrich_concurrency == 0 {
            return Err(ConfigError::Message(
                "Watcher enrich_concurrency must be greater than 0".into(),
            ));
        }

        if !(1..=3).contains(&self.watcher.notify_concurrency) {
            return Err(ConfigError::Message(
                "Watcher notify_concurrency must be between 1 and 3".into(),
            ));
        }

        if self.watcher.cooldown_secs == 0 {
            return Err(ConfigError::Message(
                "Watcher cooldown_secs must be greater than 0".into(),
            ));
        }

        if self.metrics.port == 0 {
            return Err(ConfigError::Message(
                "Metrics port must be greater than 0".into(),
            ));
        }

        if !self.metrics.endpoint.starts_with('/') {
            return Err(ConfigError::Message(
                "Metrics endpoint must start with '/'".into(),
            ));
        }

        if self.tasks.is_empty() {
            return Err(ConfigError::Message(
                "At least one task must be configured".into(),
            ));
        }

        for task in &self.tasks {
            if task.name.is_empty() {
                return Err(ConfigError::Message("Task name must not be empty".into()));
            }
            if Url::parse(&task.target).is_err() {
                return Err(ConfigError::Message(format!(
                    "Task '{}' has an invalid target URL",
                    task.name
                )));
            }
            if task.cooldown_secs == Some(0) {
                return Err(ConfigError::Message(format!(
                    "Task '{}' cooldown_secs must be greater than 0",
                    task.name
                )));
            }
        }

        Ok(())
    }
}
