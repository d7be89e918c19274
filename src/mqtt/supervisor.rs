//! Outer loop that owns the subscriber task and recreates it when it dies.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{panic_message, IngestError, IngestResult};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Restarts allowed before ingestion is left paused.
    pub max_restarts: u32,
    pub restart_delay: Duration,
}

#[derive(Debug)]
pub struct Supervisor {
    settings: SupervisorSettings,
    restarts: AtomicU32,
    paused: AtomicBool,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            restarts: AtomicU32::new(0),
            paused: AtomicBool::new(false),
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// True once the restart budget is spent and ingestion has stopped.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Run subscriber tasks built by `factory` until shutdown.
    ///
    /// Each task gets a child of `shutdown`. A task that fails with a
    /// non-fatal error or panics is replaced after the restart delay.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error a subscriber task reports.
    pub async fn run<F, Fut>(&self, mut factory: F, shutdown: CancellationToken) -> IngestResult<()>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = IngestResult<()>> + Send + 'static,
    {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let task = tokio::spawn(factory(shutdown.child_token()));

            let error = match task.await {
                Ok(Ok(())) if shutdown.is_cancelled() => {
                    tracing::info!("Subscriber stopped");
                    return Ok(());
                }
                Ok(Ok(())) => {
                    tracing::warn!("Subscriber exited without a shutdown request");
                    None
                }
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::error!(error = %e, "Subscriber hit a fatal condition");
                    return Err(e);
                }
                Ok(Err(e)) => Some(e),
                Err(join) if join.is_panic() => Some(IngestError::SubscriberPanicked(
                    panic_message(&*join.into_panic()),
                )),
                Err(join) => Some(IngestError::SubscriberPanicked(join.to_string())),
            };

            let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(e) = &error {
                tracing::error!(error = %e, restarts, "Subscriber task failed");
            }

            if restarts > self.settings.max_restarts {
                self.paused.store(true, Ordering::SeqCst);
                tracing::error!(
                    max_restarts = self.settings.max_restarts,
                    "Subscriber restart limit reached, ingestion paused until shutdown"
                );
                shutdown.cancelled().await;
                return Ok(());
            }

            tracing::info!(
                restarts,
                delay_secs = self.settings.restart_delay.as_secs(),
                "Restarting subscriber"
            );
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.settings.restart_delay) => {}
            }
        }
    }
}
