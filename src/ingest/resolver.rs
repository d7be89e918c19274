//! Get-or-create resolution of the Location → Sensor → Direction topology.
//!
//! Every function runs on the caller's connection, which is expected to be an
//! open transaction shared with the event insert that follows. There is no
//! lock around lookup-then-insert: two transactions creating the same entity
//! race, and the unique indexes make the loser fail with a unique violation.

use chrono::{DateTime, FixedOffset};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};

use crate::entity::{directions, locations, sensors};
use crate::ingest::topic::LocationKey;

/// A direction channel together with its operator-assigned label, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDirection {
    pub id: i32,
    pub reading_sense: Option<String>,
}

/// Find the location by endpoint or create it.
///
/// Municipality and equipment type of an existing location are overwritten
/// with the values from the latest message (last writer wins).
///
/// # Errors
///
/// Returns `DbErr` if a query fails, including a unique violation when a
/// concurrent transaction created the same endpoint first.
pub async fn resolve_location<C: ConnectionTrait>(
    conn: &C,
    key: &LocationKey,
    now: DateTime<FixedOffset>,
) -> Result<i32, DbErr> {
    let existing = locations::Entity::find()
        .filter(locations::Column::Endpoint.eq(key.endpoint.as_str()))
        .one(conn)
        .await?;

    if let Some(location) = existing {
        let id = location.id;
        if location.municipality == key.municipality && location.equipment_type == key.equipment_type
        {
            tracing::debug!(location_id = id, "Using existing location");
            return Ok(id);
        }

        tracing::info!(
            location_id = id,
            endpoint = %key.endpoint,
            old_municipality = %location.municipality,
            new_municipality = %key.municipality,
            old_equipment_type = %location.equipment_type,
            new_equipment_type = %key.equipment_type,
            "Refreshing location attributes"
        );
        let mut active: locations::ActiveModel = location.into();
        active.municipality = Set(key.municipality.clone());
        active.equipment_type = Set(key.equipment_type.clone());
        active.updated_at = Set(now);
        active.update(conn).await?;
        return Ok(id);
    }

    let created = locations::ActiveModel {
        endpoint: Set(key.endpoint.clone()),
        municipality: Set(key.municipality.clone()),
        equipment_type: Set(key.equipment_type.clone()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    tracing::info!(location_id = created.id, endpoint = %key.endpoint, "Created location");
    Ok(created.id)
}

/// Find the sensor by `(location, code)` or create it. Sensors never change.
///
/// # Errors
///
/// Returns `DbErr` if a query fails.
pub async fn resolve_sensor<C: ConnectionTrait>(
    conn: &C,
    location_id: i32,
    code: &str,
    now: DateTime<FixedOffset>,
) -> Result<i32, DbErr> {
    let existing = sensors::Entity::find()
        .filter(sensors::Column::LocationId.eq(location_id))
        .filter(sensors::Column::Code.eq(code))
        .one(conn)
        .await?;

    if let Some(sensor) = existing {
        tracing::debug!(sensor_id = sensor.id, "Using existing sensor");
        return Ok(sensor.id);
    }

    let created = sensors::ActiveModel {
        code: Set(code.to_string()),
        location_id: Set(location_id),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    tracing::info!(sensor_id = created.id, location_id, code, "Created sensor");
    Ok(created.id)
}

/// Find the direction channel by `(sensor, raw token)` or create it unlabelled.
///
/// # Errors
///
/// Returns `DbErr` if a query fails.
pub async fn resolve_direction<C: ConnectionTrait>(
    conn: &C,
    sensor_id: i32,
    raw: &str,
    now: DateTime<FixedOffset>,
) -> Result<ResolvedDirection, DbErr> {
    let existing = directions::Entity::find()
        .filter(directions::Column::SensorId.eq(sensor_id))
        .filter(directions::Column::RawDirection.eq(raw))
        .one(conn)
        .await?;

    if let Some(direction) = existing {
        tracing::debug!(
            direction_id = direction.id,
            reading_sense = ?direction.reading_sense,
            "Using existing direction"
        );
        return Ok(ResolvedDirection {
            id: direction.id,
            reading_sense: direction.reading_sense,
        });
    }

    let created = directions::ActiveModel {
        sensor_id: Set(sensor_id),
        raw_direction: Set(raw.to_string()),
        reading_sense: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    tracing::info!(direction_id = created.id, sensor_id, raw, "Created direction");
    Ok(ResolvedDirection {
        id: created.id,
        reading_sense: None,
    })
}
