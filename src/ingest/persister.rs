//! Append-only writers for the two fact tables.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, Set};

use crate::entity::{count_events, status_events};

/// Every count row stands for exactly one detected bicycle.
pub const DETECTION_WEIGHT: i32 = 1;

/// Everything a count row carries, resolved ids and denormalized names alike.
#[derive(Debug, Clone)]
pub struct CountEventRecord {
    pub location_id: i32,
    pub sensor_id: i32,
    pub direction_id: i32,
    pub municipality: String,
    pub endpoint: String,
    pub sensor_code: String,
    pub direction: String,
    pub reading_sense: Option<String>,
    pub received_at: DateTime<FixedOffset>,
    /// Date and time reported by the device clock, when it sent one.
    pub device_reading: Option<(NaiveDate, NaiveTime)>,
}

impl CountEventRecord {
    /// Reading date and time of the event: the device's when present,
    /// otherwise the ingestion instant in the server's time zone.
    #[must_use]
    pub fn reading_date_time(&self) -> (NaiveDate, NaiveTime) {
        self.device_reading.unwrap_or_else(|| {
            let local = self.received_at.with_timezone(&Local);
            (local.date_naive(), local.time())
        })
    }
}

#[derive(Debug, Clone)]
pub struct StatusEventRecord {
    pub location_id: i32,
    pub device: String,
    pub uptime: Option<String>,
    pub mqtt_connected: bool,
    pub dashboard_enabled: bool,
    pub reported_at: DateTime<FixedOffset>,
    pub received_at: DateTime<FixedOffset>,
}

/// Insert one count row and return its id.
///
/// # Errors
///
/// Returns `DbErr` if the insert fails.
pub async fn append_count_event<C: ConnectionTrait>(
    conn: &C,
    record: &CountEventRecord,
) -> Result<i32, DbErr> {
    let (reading_date, reading_time) = record.reading_date_time();

    let inserted = count_events::ActiveModel {
        received_at: Set(record.received_at),
        reading_date: Set(reading_date),
        reading_time: Set(reading_time),
        device_clock: Set(record.device_reading.is_some()),
        location_id: Set(record.location_id),
        sensor_id: Set(record.sensor_id),
        direction_id: Set(record.direction_id),
        municipality: Set(record.municipality.clone()),
        endpoint: Set(record.endpoint.clone()),
        sensor_code: Set(record.sensor_code.clone()),
        direction: Set(record.direction.clone()),
        reading_sense: Set(record.reading_sense.clone()),
        quantity: Set(DETECTION_WEIGHT),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    tracing::debug!(
        count_event_id = inserted.id,
        sensor = %record.sensor_code,
        direction = %record.direction,
        device_clock = inserted.device_clock,
        "Count event stored"
    );
    Ok(inserted.id)
}

/// Insert one status heartbeat row and return its id.
///
/// # Errors
///
/// Returns `DbErr` if the insert fails.
pub async fn append_status_event<C: ConnectionTrait>(
    conn: &C,
    record: &StatusEventRecord,
) -> Result<i32, DbErr> {
    let inserted = status_events::ActiveModel {
        location_id: Set(record.location_id),
        device: Set(record.device.clone()),
        uptime: Set(record.uptime.clone()),
        mqtt_connected: Set(record.mqtt_connected),
        dashboard_enabled: Set(record.dashboard_enabled),
        reported_at: Set(record.reported_at),
        received_at: Set(record.received_at),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    tracing::debug!(
        status_event_id = inserted.id,
        device = %record.device,
        "Status event stored"
    );
    Ok(inserted.id)
}
