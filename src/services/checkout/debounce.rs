use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trailing-edge debounce: of several callers that arrive within the quiet window,
/// only the last one is told to proceed.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    latest: AtomicU64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            latest: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits out the quiet window. Returns `true` if no later call arrived meanwhile.
    pub async fn settle(&self) -> bool {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
        }
        self.latest.load(Ordering::SeqCst) == ticket
    }

    /// Makes every pending `settle` return `false`.
    pub fn cancel_pending(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn only_the_last_caller_proceeds() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(300)));

        let first = tokio::spawn({
            let d = debouncer.clone();
            async move { d.settle().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::spawn({
            let d = debouncer.clone();
            async move { d.settle().await }
        });

        assert!(!first.await.unwrap());
        assert!(second.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_calls_both_proceed() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        assert!(debouncer.settle().await);
        assert!(debouncer.settle().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_drops_waiters() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(200)));
        let waiter = tokio::spawn({
            let d = debouncer.clone();
            async move { d.settle().await }
        });
        tokio::task::yield_now().await;
        debouncer.cancel_pending();
        assert!(!waiter.await.unwrap());
    }
}
