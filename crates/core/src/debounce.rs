use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Trailing-edge debouncer.
///
/// Every [`call`](Debouncer::call) bumps a generation counter and starts a
/// timer. When a timer fires it runs its action only if no later call has
/// happened in the meantime, so a burst collapses into its last call.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `action` after the quiet period, superseding any pending call.
    pub fn call<F, Fut>(&self, action: F) -> JoinHandle<bool>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) != ticket {
                trace!(ticket, "debounced call superseded");
                return false;
            }
            action().await;
            true
        })
    }

    /// Discards every pending call.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_burst_runs_only_last_call() {
        let debouncer = Debouncer::new(Duration::from_millis(40));
        let runs = Arc::new(AtomicU32::new(0));
        let last = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 1..=5 {
            let runs = Arc::clone(&runs);
            let last = Arc::clone(&last);
            handles.push(debouncer.call(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut executed = Vec::new();
        for handle in handles {
            executed.push(handle.await.unwrap());
        }

        assert_eq!(executed, vec![false, false, false, false, true]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_cancel_discards_pending() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        let handle = debouncer.call(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        assert!(!handle.await.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_separate_bursts_each_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(10));
        let runs = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let counter = Arc::clone(&runs);
            let handle = debouncer.call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert!(handle.await.unwrap());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
