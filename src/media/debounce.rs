//! Debounced persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::error::Result;

type FlushFn = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

struct Inner {
    dirty: AtomicBool,
    delay: Duration,
    flush: Box<FlushFn>,
    timer: Mutex<Option<JoinHandle<()>>>,
    // Serialises writes so an older snapshot never lands after a newer one
    write_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn flush_if_dirty(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = (self.flush)().await;
        if let Err(e) = &result {
            self.dirty.store(true, Ordering::SeqCst);
            tracing::warn!(error = %e, "debounced flush failed, will retry on next change");
        }
        result
    }
}

/// Coalesces bursts of changes into one write
///
/// Every [`mark_dirty`](Self::mark_dirty) restarts a quiet-period timer; the
/// flush callback runs once the timer elapses without further changes. A
/// timer that fires with nothing dirty writes nothing.
#[derive(Clone)]
pub struct DebouncedFlush {
    inner: Arc<Inner>,
}

impl DebouncedFlush {
    /// Run `flush` after `delay` of quiet following a change
    pub fn new<F>(delay: Duration, flush: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                dirty: AtomicBool::new(false),
                delay,
                flush: Box::new(flush),
                timer: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Record a change and restart the quiet-period timer
    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            // Detached so a later reset cannot abort a write in progress
            tokio::spawn(async move {
                if inner.flush_if_dirty().await.is_ok() {
                    tracing::debug!("debounced flush complete");
                }
            });
        });

        let previous = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Whether changes are waiting to be written
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Cancel the timer and write immediately if dirty
    pub async fn flush_now(&self) -> Result<()> {
        let pending = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            pending.abort();
        }
        self.inner.flush_if_dirty().await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StorageError};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting(delay: Duration) -> (DebouncedFlush, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&writes);
        let flush = DebouncedFlush::new(delay, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        (flush, writes)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_writes_once() {
        let (flush, writes) = counting(Duration::from_secs(2));

        for _ in 0..10 {
            flush.mark_dirty();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert!(!flush.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_restarts_on_each_change() {
        let (flush, writes) = counting(Duration::from_secs(2));

        flush.mark_dirty();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        flush.mark_dirty();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_now_writes_only_when_dirty() {
        let (flush, writes) = counting(Duration::from_secs(60));

        flush.flush_now().await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        flush.mark_dirty();
        flush.flush_now().await.unwrap();
        flush.flush_now().await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_flush_stays_dirty() {
        let flush = DebouncedFlush::new(Duration::from_secs(60), || {
            async {
                Err(Error::Storage(StorageError::Unavailable("disk gone".into())))
            }
            .boxed()
        });

        flush.mark_dirty();
        assert!(flush.flush_now().await.is_err());
        assert!(flush.is_dirty());
    }
}
