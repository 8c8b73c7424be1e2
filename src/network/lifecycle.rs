//! Initialise-once / dispose-once bookkeeping shared by the backends.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::OnceCell;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    init: OnceCell<()>,
    disposed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `init` once; overlapping callers await the same attempt.
    ///
    /// A failed attempt leaves the cell empty so the next caller retries.
    pub(crate) async fn initialize<F, Fut>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        self.init.get_or_try_init(init).await.map(|_| ())
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if !self.init.initialized() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Returns true only for the first call
    pub(crate) fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn overlapping_initializations_run_once() {
        let lifecycle = Arc::new(Lifecycle::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lifecycle = Arc::clone(&lifecycle);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                lifecycle
                    .initialize(|| async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(lifecycle.ensure_ready().is_ok());
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle
            .initialize(|| async { Err(Error::TransientNetwork("down".into())) })
            .await;
        assert!(first.is_err());
        assert!(matches!(lifecycle.ensure_ready(), Err(Error::NotInitialized)));

        lifecycle.initialize(|| async { Ok(()) }).await.unwrap();
        assert!(lifecycle.ensure_ready().is_ok());
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_blocks_use() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize(|| async { Ok(()) }).await.unwrap();

        assert!(lifecycle.dispose());
        assert!(!lifecycle.dispose());
        assert!(matches!(lifecycle.ensure_ready(), Err(Error::Disposed)));
        assert!(matches!(
            lifecycle.initialize(|| async { Ok(()) }).await,
            Err(Error::Disposed)
        ));
    }
}
