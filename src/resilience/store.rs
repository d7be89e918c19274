use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde::Serialize;

use crate::error::{IngestError, IngestResult};
use crate::resilience::RetryPolicy;

/// Something that can hand out a store connection, possibly failing.
pub trait StoreSource: Send + Sync {
    type Conn: Send;

    fn open(&self) -> impl Future<Output = Result<Self::Conn, DbErr>> + Send;
}

/// Production source: a pooled connection with a transaction already begun.
impl StoreSource for DatabaseConnection {
    type Conn = DatabaseTransaction;

    fn open(&self) -> impl Future<Output = Result<Self::Conn, DbErr>> + Send {
        self.begin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "consecutive_failures", rename_all = "snake_case")]
pub enum StoreHealth {
    Healthy,
    Degraded(u32),
    Fatal,
}

/// Retries store acquisition with backoff and escalates after too many
/// consecutive failures.
pub struct StoreGuard<S> {
    source: S,
    policy: RetryPolicy,
    failures: AtomicU32,
}

impl<S: StoreSource> StoreGuard<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            failures: AtomicU32::new(0),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> StoreHealth {
        match self.consecutive_failures() {
            0 => StoreHealth::Healthy,
            n if n >= self.policy.failure_threshold => StoreHealth::Fatal,
            n => StoreHealth::Degraded(n),
        }
    }

    /// Open a connection, retrying until one is obtained.
    ///
    /// # Errors
    ///
    /// Returns the fatal `IngestError::StoreUnavailable` as soon as the
    /// consecutive failure count reaches the policy threshold.
    pub async fn acquire(&self) -> IngestResult<S::Conn> {
        let mut backoff = self.policy.backoff();

        loop {
            match self.source.open().await {
                Ok(conn) => {
                    let previous = self.failures.swap(0, Ordering::SeqCst);
                    if previous > 0 {
                        tracing::info!(failures = previous, "Database connection recovered");
                    }
                    return Ok(conn);
                }
                Err(e) => {
                    let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::error!(error = %e, attempt = failures, "Failed to acquire database connection");

                    if failures >= self.policy.failure_threshold {
                        tracing::error!(
                            failures,
                            threshold = self.policy.failure_threshold,
                            "Too many consecutive database failures, giving up"
                        );
                        return Err(IngestError::StoreUnavailable { failures });
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(delay_ms = delay.as_millis() as u64, "Retrying database connection");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
