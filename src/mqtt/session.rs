//! MQTT subscriber session: connect, subscribe, dispatch, reconnect.
//!
//! Messages are handled inline in the poll loop, one at a time. A message in
//! flight always runs to commit or rollback; shutdown is only observed
//! between messages, right before the client disconnects.
//!
//! Keep-alive pings also depend on the poll loop, so a message stuck on store
//! retries can outlive the keep-alive window and cost one disconnect.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use sea_orm::DatabaseTransaction;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, IngestResult};
use crate::ingest::Ingestor;
use crate::mqtt::transport::{Transport, TransportError, TransportEvent};
use crate::resilience::{Backoff, RetryPolicy, StoreSource};

/// Receives every inbound message of the session.
pub trait MessageHandler: Send + Sync {
    /// Only fatal errors may be returned; anything else ends the session.
    fn dispatch(&self, topic: &str, payload: &[u8]) -> impl Future<Output = IngestResult<()>> + Send;
}

impl<S: StoreSource<Conn = DatabaseTransaction>> MessageHandler for Ingestor<S> {
    fn dispatch(&self, topic: &str, payload: &[u8]) -> impl Future<Output = IngestResult<()>> + Send {
        self.handle(topic, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Connection bookkeeping shared between the session and its observers.
#[derive(Debug, Default)]
pub struct SessionMonitor {
    state: AtomicU8,
    disconnects: AtomicU32,
    reconnects: AtomicU64,
    reconnecting: AtomicBool,
}

/// Held while a reconnect attempt runs; releases the guard on drop.
#[derive(Debug)]
pub struct ReconnectPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ReconnectPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SessionMonitor {
    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn consecutive_disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Claim the reconnect guard. `None` while another attempt is running.
    ///
    /// The session itself reconnects inline from its poll loop, so the guard
    /// is only contested by reconnects started from outside that loop. The
    /// session still waits its backoff when the guard is taken.
    pub fn try_begin_reconnect(&self) -> Option<ReconnectPermit<'_>> {
        self.reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ReconnectPermit {
                flag: &self.reconnecting,
            })
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub topic_filter: String,
    /// Backoff and consecutive-disconnect threshold for the broker link.
    pub retry: RetryPolicy,
}

pub struct Session<T, H> {
    transport: T,
    handler: Arc<H>,
    monitor: Arc<SessionMonitor>,
    settings: SessionSettings,
    backoff: Backoff,
    ever_connected: bool,
}

impl<T: Transport, H: MessageHandler> Session<T, H> {
    pub fn new(
        transport: T,
        handler: Arc<H>,
        monitor: Arc<SessionMonitor>,
        settings: SessionSettings,
    ) -> Self {
        let backoff = settings.retry.backoff();
        Self {
            transport,
            handler,
            monitor,
            settings,
            backoff,
            ever_connected: false,
        }
    }

    /// Drive the session until shutdown or an unrecoverable error.
    ///
    /// # Errors
    ///
    /// Returns the fatal `IngestError::BrokerUnavailable` when consecutive
    /// disconnects reach the threshold (the counter resets once the broker
    /// grants the subscription), a fatal error from the handler, or
    /// `IngestError::Transport` if subscribing fails.
    pub async fn run(mut self, shutdown: CancellationToken) -> IngestResult<()> {
        self.monitor.set_state(LinkState::Connecting);
        tracing::info!(filter = %self.settings.topic_filter, "Starting MQTT session");

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                event = self.transport.poll() => Some(event),
            };

            let Some(event) = event else {
                self.close().await;
                return Ok(());
            };

            match event {
                Ok(TransportEvent::Connected) => self.on_connected().await?,
                Ok(TransportEvent::Subscribed) => self.on_subscribed(),
                Ok(TransportEvent::Message { topic, payload }) => {
                    self.handler.dispatch(&topic, &payload).await?;
                }
                Ok(TransportEvent::Idle) => {}
                Err(e) => self.on_disconnect(e, &shutdown).await?,
            }
        }
    }

    async fn on_connected(&mut self) -> IngestResult<()> {
        if self.ever_connected {
            self.monitor.reconnects.fetch_add(1, Ordering::SeqCst);
        }
        self.ever_connected = true;
        self.backoff.reset();
        self.monitor.set_state(LinkState::Connected);

        tracing::info!(filter = %self.settings.topic_filter, "Connected to MQTT broker, subscribing");
        self.transport.subscribe(&self.settings.topic_filter).await?;
        Ok(())
    }

    fn on_subscribed(&self) {
        let previous = self.monitor.disconnects.swap(0, Ordering::SeqCst);
        if previous > 0 {
            tracing::info!(previous, "MQTT link is healthy again, disconnect counter reset");
        }
        tracing::debug!(filter = %self.settings.topic_filter, "Subscription granted");
    }

    /// A transport error counts as a disconnect only when it ends a link
    /// that was up. Failed attempts while reconnecting just back off again.
    async fn on_disconnect(
        &mut self,
        error: TransportError,
        shutdown: &CancellationToken,
    ) -> IngestResult<()> {
        if !self.ever_connected {
            let delay = self.settings.retry.initial_delay;
            tracing::warn!(error = %error, delay_ms = delay.as_millis() as u64, "Initial MQTT connection failed, retrying");
            sleep_or_cancel(delay, shutdown).await;
            return Ok(());
        }

        if self.monitor.link_state() == LinkState::Connected {
            self.monitor.set_state(LinkState::Disconnected);
            let disconnects = self.monitor.disconnects.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(error = %error, disconnects, "Disconnected from MQTT broker");

            if disconnects >= self.settings.retry.failure_threshold {
                tracing::error!(
                    disconnects,
                    threshold = self.settings.retry.failure_threshold,
                    "Too many consecutive MQTT disconnects, giving up"
                );
                return Err(IngestError::BrokerUnavailable { disconnects });
            }
        } else {
            tracing::debug!(error = %error, "MQTT reconnect attempt failed");
        }

        self.reconnect(shutdown).await;
        Ok(())
    }

    async fn reconnect(&mut self, shutdown: &CancellationToken) {
        let monitor = Arc::clone(&self.monitor);
        monitor.set_state(LinkState::Connecting);
        let delay = self.backoff.next_delay();

        let permit = monitor.try_begin_reconnect();
        if permit.is_some() {
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to MQTT broker");
        } else {
            tracing::info!(delay_ms = delay.as_millis() as u64, "MQTT reconnect already in progress, waiting");
        }

        // The next poll of the transport performs the actual reconnect
        sleep_or_cancel(delay, shutdown).await;
        drop(permit);
    }

    async fn close(&mut self) {
        tracing::info!("Shutting down MQTT session");
        self.transport.disconnect().await;
        self.monitor.set_state(LinkState::Disconnected);
    }
}

async fn sleep_or_cancel(delay: std::time::Duration, shutdown: &CancellationToken) {
    tokio::select! {
        () = shutdown.cancelled() => {}
        () = tokio::time::sleep(delay) => {}
    }
}
