use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::info;

use crate::runner::{RunReport, TaskRunner};

/// Drives the fixed task set: every cycle all tasks run concurrently, the
/// cycle waits for the slowest one, then sleeps the polling interval.
///
/// Task failures are contained inside each runner, so one permanently
/// failing task can delay a cycle at most by its own retry budget and never
/// aborts its siblings. There is no mid-flight cancellation; the only
/// timeout lives inside the retry policy, per attempt.
pub struct WatchScheduler {
    runners: Vec<TaskRunner>,
    poll_interval: Duration,
}

impl WatchScheduler {
    pub fn new(runners: Vec<TaskRunner>, poll_interval: Duration) -> Self {
        Self {
            runners,
            poll_interval,
        }
    }

    pub fn task_count(&self) -> usize {
        self.runners.len()
    }

    /// Run every task once and collect their reports.
    pub async fn run_cycle(&self) -> Vec<RunReport> {
        let reports = join_all(self.runners.iter().map(|runner| runner.run())).await;

        let notified: usize = reports.iter().map(|r| r.notified.len()).sum();
        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        info!(
            "cycle complete: {} tasks, {} notifications, {} failed runs",
            reports.len(),
            notified,
            failed
        );
        reports
    }

    /// Poll until the future is dropped (the binary races this against
    /// ctrl-c).
    pub async fn run_forever(&self) {
        info!(
            "watching {} tasks every {:?}",
            self.runners.len(),
            self.poll_interval
        );
        loop {
            self.run_cycle().await;
            sleep(self.poll_interval).await;
        }
    }
}
