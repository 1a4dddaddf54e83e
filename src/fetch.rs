use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::warn;

/// A network fetch failed. `Timeout` and `ConnectionFailure` are transient
/// and worth retrying against the same target; `Other` surfaces immediately.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("fetch failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::ConnectionFailure(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() {
            FetchError::ConnectionFailure(err.to_string())
        } else {
            FetchError::Other(err.to_string())
        }
    }
}

/// Bounded retry with a fixed (non-exponential) delay between attempts.
///
/// One policy instance is shared by every fetch in a task run: the search
/// page, each detail page, and the secondary price endpoint. The wrapped
/// operation owns its session resources, so they are released by drop on
/// success, exhaustion, or unwind. An empty-but-successful body is not a
/// failure here; that judgment belongs to the caller.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `action` up to `max_attempts` times, sleeping `delay` between
    /// attempts while the error stays transient. The last error is surfaced
    /// on exhaustion.
    pub async fn run<T, A, F>(&self, action: A) -> Result<T, FetchError>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, FetchError>>,
    {
        let strategy =
            FixedInterval::new(self.delay).take(self.max_attempts.saturating_sub(1) as usize);

        RetryIf::spawn(strategy, action, |err: &FetchError| {
            let transient = err.is_transient();
            if transient {
                warn!("transient fetch failure, will retry: {}", err);
            }
            transient
        })
        .await
    }
}
