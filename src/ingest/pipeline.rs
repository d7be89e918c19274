//! Per-message orchestration: classify, decode, resolve, persist, commit.

use std::panic::AssertUnwindSafe;

use chrono::{DateTime, FixedOffset, Utc};
use futures::FutureExt;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr};

use crate::error::{panic_message, IngestError, IngestResult};
use crate::ingest::payload::{CountPayload, StatusPayload};
use crate::ingest::persister::{self, CountEventRecord, StatusEventRecord};
use crate::ingest::resolver;
use crate::ingest::stats::IngestStats;
use crate::ingest::topic::{self, CountTopic, StatusTopic, TopicKind, Unrecognized};
use crate::resilience::{StoreGuard, StoreHealth, StoreSource};

/// A message that lost a topology creation race is replayed this many times.
const UNIQUE_VIOLATION_RETRIES: u32 = 1;

/// What a successfully handled message produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Count {
        event_id: i32,
        location_id: i32,
        sensor_id: i32,
        direction_id: i32,
    },
    Status {
        event_id: i32,
        location_id: i32,
    },
    Ignored(Unrecognized),
}

enum Job<'a> {
    Count(&'a CountTopic, &'a CountPayload),
    Status(&'a StatusTopic, &'a StatusPayload),
}

/// Stores messages through any source that hands out open transactions.
pub struct Ingestor<S = DatabaseConnection> {
    store: StoreGuard<S>,
    stats: IngestStats,
}

impl Ingestor<DatabaseConnection> {
    pub fn db(&self) -> &DatabaseConnection {
        self.store.source()
    }
}

impl<S: StoreSource<Conn = DatabaseTransaction>> Ingestor<S> {
    pub fn new(store: StoreGuard<S>) -> Self {
        Self {
            store,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn store_health(&self) -> StoreHealth {
        self.store.health()
    }

    /// Message boundary used by the subscriber.
    ///
    /// Every per-message failure, panics included, is logged, counted and
    /// swallowed here so that one bad message never ends the session.
    ///
    /// # Errors
    ///
    /// Only fatal errors (the store is gone) are returned.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> IngestResult<()> {
        self.stats.record_received();
        tracing::debug!(topic, bytes = payload.len(), "MQTT message received");

        let received_at = Utc::now().fixed_offset();
        let result = AssertUnwindSafe(self.process(topic, payload, received_at))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(IngestError::HandlerPanicked(panic_message(&*panic))));

        match result {
            Ok(outcome) => {
                self.stats.record_outcome(&outcome);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.stats.record_failure();
                tracing::error!(topic, error = %e, "Failed to process message");
                Ok(())
            }
        }
    }

    /// Classify and store one message, reporting every error to the caller.
    ///
    /// Topics outside the grammar return `Outcome::Ignored` without touching
    /// the store.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::InvalidPayload` for unusable status payloads,
    /// `IngestError::Database` when the transaction failed and was rolled
    /// back, and the fatal `IngestError::StoreUnavailable`.
    pub async fn process(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<FixedOffset>,
    ) -> IngestResult<Outcome> {
        match topic::classify(topic) {
            TopicKind::Unrecognized(reason) => {
                match &reason {
                    Unrecognized::NotACounter(_) => {
                        tracing::debug!(topic, %reason, "Ignoring message");
                    }
                    _ => tracing::warn!(topic, %reason, "Ignoring message"),
                }
                Ok(Outcome::Ignored(reason))
            }
            TopicKind::Count(count) => {
                let payload = CountPayload::parse(payload);
                tracing::debug!(
                    equipment_type = %count.location.equipment_type,
                    municipality = %count.location.municipality,
                    endpoint = %count.location.endpoint,
                    sensor = %count.sensor_code,
                    direction = %payload.direction,
                    "Processing count event"
                );
                self.commit_with_retry(&Job::Count(&count, &payload), received_at)
                    .await
            }
            TopicKind::Status(status) => {
                let payload = StatusPayload::parse(payload)?;
                tracing::debug!(
                    endpoint = %status.location.endpoint,
                    device = %payload.device,
                    "Processing status event"
                );
                self.commit_with_retry(&Job::Status(&status, &payload), received_at)
                    .await
            }
        }
    }

    async fn commit_with_retry(
        &self,
        job: &Job<'_>,
        received_at: DateTime<FixedOffset>,
    ) -> IngestResult<Outcome> {
        let mut retries = 0;
        loop {
            match self.commit_once(job, received_at).await {
                Err(e) if e.is_unique_violation() && retries < UNIQUE_VIOLATION_RETRIES => {
                    retries += 1;
                    self.stats.record_retry();
                    tracing::warn!(error = %e, "Lost a topology creation race, replaying message");
                }
                other => return other,
            }
        }
    }

    async fn commit_once(
        &self,
        job: &Job<'_>,
        received_at: DateTime<FixedOffset>,
    ) -> IngestResult<Outcome> {
        let txn = self.store.acquire().await?;

        let written = match job {
            Job::Count(topic, payload) => write_count(&txn, topic, payload, received_at).await,
            Job::Status(topic, payload) => write_status(&txn, topic, payload, received_at).await,
        };

        match written {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e.into())
            }
        }
    }
}

async fn write_count(
    txn: &DatabaseTransaction,
    topic: &CountTopic,
    payload: &CountPayload,
    received_at: DateTime<FixedOffset>,
) -> Result<Outcome, DbErr> {
    let location_id = resolver::resolve_location(txn, &topic.location, received_at).await?;
    let sensor_id = resolver::resolve_sensor(txn, location_id, &topic.sensor_code, received_at).await?;
    let direction =
        resolver::resolve_direction(txn, sensor_id, &payload.direction, received_at).await?;

    let record = CountEventRecord {
        location_id,
        sensor_id,
        direction_id: direction.id,
        municipality: topic.location.municipality.clone(),
        endpoint: topic.location.endpoint.clone(),
        sensor_code: topic.sensor_code.clone(),
        direction: payload.direction.clone(),
        reading_sense: direction.reading_sense,
        received_at,
        device_reading: payload.reading,
    };
    let event_id = persister::append_count_event(txn, &record).await?;

    Ok(Outcome::Count {
        event_id,
        location_id,
        sensor_id,
        direction_id: direction.id,
    })
}

async fn write_status(
    txn: &DatabaseTransaction,
    topic: &StatusTopic,
    payload: &StatusPayload,
    received_at: DateTime<FixedOffset>,
) -> Result<Outcome, DbErr> {
    let location_id = resolver::resolve_location(txn, &topic.location, received_at).await?;

    let record = StatusEventRecord {
        location_id,
        device: payload.device.clone(),
        uptime: payload.uptime.clone(),
        mqtt_connected: payload.mqtt_connected,
        dashboard_enabled: payload.dashboard_enabled,
        reported_at: payload.reported_at,
        received_at,
    };
    let event_id = persister::append_status_event(txn, &record).await?;

    Ok(Outcome::Status {
        event_id,
        location_id,
    })
}
