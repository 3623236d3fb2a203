use std::{future::Future, time::Duration};

use hublink_core::ConnectionOptions;
use tracing::debug;

/// Bounded fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `None` retries forever.
    pub max_retries: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: Option<u32>, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    #[must_use]
    pub const fn from_options(options: &ConnectionOptions) -> Self {
        Self::new(options.retry_count, options.reconnect_delay)
    }

    /// Whether another attempt may follow `retries_done` retries.
    #[must_use]
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        self.max_retries.is_none_or(|max| retries_done < max)
    }

    /// Run `op` until it succeeds, the budget is spent or `should_retry`
    /// vetoes the failure. `op` receives the zero-based attempt number.
    ///
    /// `should_retry` is only consulted while the budget allows another
    /// attempt; the delay follows it.
    ///
    /// # Errors
    /// Returns the last failure of `op`.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, mut should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !self.allows_retry(attempt) || !should_retry(&err) {
                return Err(err);
            }
            attempt += 1;
            debug!(attempt, delay = ?self.delay, "Retrying");
            tokio::time::sleep(self.delay).await;
        }
    }
}
