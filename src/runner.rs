use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::TaskConfig;
use crate::cooldown::CooldownStore;
use crate::enricher::{DetailEnricher, EnrichStats};
use crate::fetch::RetryPolicy;
use crate::filters::{eligibility, keyword, EligibilityStats, KeywordStats};
use crate::models::Product;
use crate::registry::SourcePlugin;
use crate::sinks::{NotifyMeta, Sink};
use crate::utils::error::AppError;

/// Pipeline position of a task run. Terminal states are `Done`, `NoResults`
/// and `NoneEligible`; the others mark where an aborted run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Searching,
    KeywordFiltering,
    Enriching,
    StockFiltering,
    Deduping,
    Notifying,
    Done,
    NoResults,
    NoneEligible,
}

/// Accumulated per-stage stats for one task run. Emitted even when a stage
/// short-circuits or errors, so "nothing found" cycles stay observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub task: String,
    pub state: RunState,
    pub keyword: Option<KeywordStats>,
    pub enrich: Option<EnrichStats>,
    pub eligibility: Option<EligibilityStats>,
    /// URLs actually dispatched this run.
    pub notified: Vec<String>,
    /// Eligible products suppressed by the cooldown window.
    pub suppressed: usize,
    /// Transport failures; these products stay eligible next cycle.
    pub delivery_failures: usize,
    pub error: Option<String>,
}

impl RunReport {
    fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            state: RunState::Searching,
            keyword: None,
            enrich: None,
            eligibility: None,
            notified: Vec::new(),
            suppressed: 0,
            delivery_failures: 0,
            error: None,
        }
    }
}

/// Executes one task's scrape → filter → enrich → filter → dedup → notify
/// pipeline. Stateless between runs apart from the shared cooldown store.
pub struct TaskRunner {
    task: TaskConfig,
    plugin: SourcePlugin,
    sink: Arc<dyn Sink>,
    cooldown: Arc<CooldownStore>,
    retry: RetryPolicy,
    enrich_concurrency: usize,
    notify_concurrency: usize,
    global_blacklist: Vec<String>,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task: TaskConfig,
        plugin: SourcePlugin,
        sink: Arc<dyn Sink>,
        cooldown: Arc<CooldownStore>,
        retry: RetryPolicy,
        enrich_concurrency: usize,
        notify_concurrency: usize,
        global_blacklist: Vec<String>,
    ) -> Self {
        Self {
            task,
            plugin,
            sink,
            cooldown,
            retry,
            enrich_concurrency,
            notify_concurrency: notify_concurrency.clamp(1, 3),
            global_blacklist,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    /// Run the pipeline once. Errors are contained here: a failed run comes
    /// back as a report with `error` set, never as a panic or a propagated
    /// error that could take sibling tasks down.
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new(&self.task.name);
        counter!("watcher_task_runs_total", "task" => self.task.name.clone()).increment(1);

        if let Err(err) = self.execute(&mut report).await {
            error!(
                "task '{}' aborted in state {:?}: {}",
                self.task.name, report.state, err
            );
            counter!("watcher_task_errors_total", "task" => self.task.name.clone()).increment(1);
            report.error = Some(err.to_string());
        }
        report
    }

    async fn execute(&self, report: &mut RunReport) -> Result<(), AppError> {
        report.state = RunState::Searching;
        let raw = self
            .retry
            .run(|| self.plugin.source.fetch_listing(&self.task.target))
            .await?;
        let products = self.plugin.extractor.extract_products(&raw);
        counter!("watcher_products_scraped_total", "task" => self.task.name.clone())
            .increment(products.len() as u64);
        if products.is_empty() {
            info!("task '{}': no products found", self.task.name);
            report.state = RunState::NoResults;
            return Ok(());
        }

        report.state = RunState::KeywordFiltering;
        let (products, keyword_stats) = keyword::apply(products, &self.task.keyword_config());
        report.keyword = Some(keyword_stats);
        if products.is_empty() {
            info!("task '{}': no products matched keywords", self.task.name);
            report.state = RunState::NoResults;
            return Ok(());
        }

        report.state = RunState::Enriching;
        let blacklist = self.task.effective_blacklist(&self.global_blacklist);
        let enricher = DetailEnricher::new(
            Arc::clone(&self.plugin.source),
            Arc::clone(&self.plugin.extractor),
            self.retry,
            self.enrich_concurrency,
        );
        let (products, enrich_stats) = enricher.enrich(products, &blacklist).await;
        report.enrich = Some(enrich_stats);

        report.state = RunState::StockFiltering;
        let eligibility_config = self.task.eligibility_config(&self.global_blacklist);
        let (products, eligibility_stats) = eligibility::apply(products, &eligibility_config);
        report.eligibility = Some(eligibility_stats);
        if products.is_empty() {
            info!("task '{}': nothing eligible this cycle", self.task.name);
            report.state = RunState::NoneEligible;
            return Ok(());
        }

        report.state = RunState::Deduping;
        let to_notify = self.claim_eligible(products, report);

        report.state = RunState::Notifying;
        self.notify(to_notify, report).await;

        report.state = RunState::Done;
        info!(
            "task '{}' done: {} notified, {} suppressed, {} delivery failures",
            self.task.name,
            report.notified.len(),
            report.suppressed,
            report.delivery_failures
        );
        Ok(())
    }

    /// Claim each eligible URL against the cooldown store. Claims are
    /// atomic, so a concurrent run of an overlapping task cannot dispatch
    /// the same product twice.
    fn claim_eligible(&self, products: Vec<Product>, report: &mut RunReport) -> Vec<Product> {
        let now = Utc::now();
        let window = self
            .task
            .cooldown_secs
            .map(|secs| chrono::Duration::seconds(secs as i64));

        let mut claimed = Vec::with_capacity(products.len());
        for product in products {
            let acquired = match window {
                Some(window) => self.cooldown.try_acquire_within(&product.url, now, window),
                None => self.cooldown.try_acquire(&product.url, now),
            };
            if acquired {
                claimed.push(product);
            } else {
                info!(
                    "task '{}': '{}' suppressed by cooldown",
                    self.task.name, product.title
                );
                report.suppressed += 1;
            }
        }
        claimed
    }

    async fn notify(&self, products: Vec<Product>, report: &mut RunReport) {
        let meta = NotifyMeta {
            display_name: self.task.display_name().to_string(),
            source_label: self.task.source_label.clone(),
        };

        let outcomes: Vec<_> = stream::iter(products)
            .map(|product| {
                let meta = meta.clone();
                async move {
                    let outcome = self.sink.deliver(&product, &meta).await;
                    (product.url, outcome)
                }
            })
            .buffer_unordered(self.notify_concurrency)
            .collect()
            .await;

        for (url, outcome) in outcomes {
            match outcome {
                // Ok(true)/Ok(false) both mean an attempt was made; the
                // window restarts either way.
                Ok(delivered) => {
                    self.cooldown.record_notified(&url, Utc::now());
                    if delivered {
                        counter!("watcher_notifications_sent_total", "task" => self.task.name.clone())
                            .increment(1);
                        report.notified.push(url);
                    } else {
                        report.delivery_failures += 1;
                    }
                }
                Err(err) => {
                    warn!(
                        "task '{}': delivery transport failed for {}: {}",
                        self.task.name, url, err
                    );
                    // No attempt was made; leave the product eligible.
                    self.cooldown.release(&url);
                    report.delivery_failures += 1;
                }
            }
        }
    }
}
