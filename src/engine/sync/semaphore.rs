use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::shared::config::CONFIG;

/// Counted semaphore for awaiting N-of-M cluster acknowledgements. Waits
/// wake on a period purely for cancellation responsiveness: the error
/// checker runs on every wakeup and a false verdict ends the wait early.
pub struct QuerySemaphore {
    count: Mutex<u64>,
    notify: Notify,
}

impl QuerySemaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    pub fn release(&self, n: u64) {
        {
            let mut count = self.count.lock().unwrap();
            *count += n;
        }
        self.notify.notify_waiters();
    }

    /// Wakes waiters without releasing permits, so they re-consult the
    /// error checker immediately.
    pub fn interrupt(&self) {
        self.notify.notify_waiters();
    }

    /// Waits for `n` permits. Returns false when the error checker
    /// invalidated the wait. The timeout never caps total duration; it
    /// only paces checker consultations.
    pub async fn enter<F>(&self, n: u64, error_checker: F) -> bool
    where
        F: Fn() -> bool,
    {
        self.enter_with_period(n, error_checker, Duration::from_secs(CONFIG.engine.ack_timeout_secs))
            .await
    }

    pub async fn enter_with_period<F>(&self, mut n: u64, error_checker: F, period: Duration) -> bool
    where
        F: Fn() -> bool,
    {
        if !error_checker() {
            return false;
        }
        loop {
            {
                // take whatever is available to avoid waiting forever on a
                // partially released count
                let mut count = self.count.lock().unwrap();
                let take = n.min(*count);
                *count -= take;
                n -= take;
                if n == 0 {
                    return true;
                }
            }
            let notified = self.notify.notified();
            let _ = tokio::time::timeout(period, notified).await;
            if !error_checker() {
                return false;
            }
        }
    }

    pub fn try_enter(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for QuerySemaphore {
    fn default() -> Self {
        Self::new()
    }
}
