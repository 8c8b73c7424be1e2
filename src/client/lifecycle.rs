//! Background draining and shutdown.

use tokio::task::JoinHandle;

use super::WikiClient;
use crate::error::Result;

impl WikiClient {
    /// Start draining the download queue in the background
    ///
    /// The task drains once immediately (for items restored from a previous
    /// session), then again after every enqueue. It stops at
    /// [`shutdown`](Self::shutdown).
    pub fn spawn_background_drain(&self) -> JoinHandle<()> {
        self.queue
            .spawn_drain_loop(self.drain_worker(), self.shutdown_token.child_token())
    }

    /// Stop background work, persist the media map and close every port
    ///
    /// Ports are closed even when the media map cannot be written; the write
    /// error is returned afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down wiki client");
        self.shutdown_token.cancel();

        let flushed = self.media.flush().await;
        if let Err(e) = &flushed {
            tracing::error!(error = %e, "failed to persist media map during shutdown");
        }

        self.pool.dispose_all().await;
        tracing::info!("wiki client shut down");
        flushed
    }
}
