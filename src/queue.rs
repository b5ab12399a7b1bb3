use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{Notify, Semaphore};

/// Bounded-concurrency task scheduler with support for deferred tasks and an
/// "all idle" barrier.
///
/// Tasks acquire a permit from a fair semaphore before running, so at most
/// `concurrency` of them execute at once and runnable tasks are served FIFO.
/// A delayed task counts as pending from the moment it is added; `on_idle`
/// therefore only resolves once nothing is runnable, running, or sleeping
/// out a delay.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    permits: Semaphore,
    pending: AtomicUsize,
    idle: Notify,
}

impl WorkQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Semaphore::new(concurrency.max(1)),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue a unit of work. With a delay, the task only becomes runnable
    /// once the delay has elapsed.
    pub fn add(&self, work: BoxFuture<'static, ()>, delay: Option<Duration>) {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // The guard keeps the pending count accurate even if the work
            // panics; a wedged idle barrier would hang the whole run.
            let _done = DoneGuard(Arc::clone(&inner));
            if let Some(delay) = delay {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            let _permit = inner.permits.acquire().await.expect("semaphore never closed");
            work.await;
        });
    }

    /// Resolves once the queue has zero runnable, running, and delayed tasks.
    pub async fn on_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct DoneGuard(Arc<Inner>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}
