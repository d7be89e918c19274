//! End-to-end ingestion against an in-memory SQLite store.
//!
//! Run with: cargo test --test ingest_sqlite_test

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use migration::MigratorTrait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, PaginatorTrait, QueryFilter, Set, TransactionTrait,
};

use bicicla_ingest::entity::{count_events, directions, locations, sensors, status_events};
use bicicla_ingest::error::IngestError;
use bicicla_ingest::ingest::topic::Unrecognized;
use bicicla_ingest::ingest::{Ingestor, Outcome};
use bicicla_ingest::resilience::{RetryPolicy, StoreGuard, StoreHealth, StoreSource};

const COUNT_TOPIC: &str = "Bramal/Bicicla/Totem/Providencia/ENDPOINT1/BC01";
const STATUS_TOPIC: &str = "Bramal/Bicicla/Totem/Providencia/ENDPOINT1/control/status";

async fn migrated_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.expect("open sqlite");
    migration::Migrator::up(&db, None).await.expect("run migrations");
    db
}

async fn ingestor() -> Ingestor {
    Ingestor::new(StoreGuard::new(
        migrated_db().await,
        RetryPolicy::new(Duration::from_secs(10), 10),
    ))
}

/// Inside the transaction, inserts the same location right before the
/// pipeline does, as a concurrent writer winning the race would.
const COMPETING_LOCATION_INSERT: &str = "CREATE TEMP TRIGGER competing_location \
    BEFORE INSERT ON locations BEGIN \
    INSERT INTO locations (endpoint, municipality, equipment_type, created_at, updated_at) \
    VALUES (NEW.endpoint, NEW.municipality, NEW.equipment_type, NEW.created_at, NEW.updated_at); \
    END";

/// Hands out transactions in which a competing writer wins the next
/// `races` location inserts. The trigger is rolled back with its transaction.
struct RacingSource {
    db: DatabaseConnection,
    races: AtomicU32,
}

impl StoreSource for RacingSource {
    type Conn = DatabaseTransaction;

    fn open(&self) -> impl Future<Output = Result<DatabaseTransaction, DbErr>> + Send {
        async move {
            let txn = self.db.begin().await?;
            let racing = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if racing {
                txn.execute_unprepared(COMPETING_LOCATION_INSERT).await?;
            }
            Ok(txn)
        }
    }
}

async fn racing_ingestor(races: u32) -> (Ingestor<RacingSource>, DatabaseConnection) {
    let db = migrated_db().await;
    let source = RacingSource {
        db: db.clone(),
        races: AtomicU32::new(races),
    };
    let ingestor = Ingestor::new(StoreGuard::new(
        source,
        RetryPolicy::new(Duration::from_secs(10), 10),
    ));
    (ingestor, db)
}

async fn send(ingestor: &Ingestor, topic: &str, payload: &str) -> Result<Outcome, IngestError> {
    ingestor
        .process(topic, payload.as_bytes(), Utc::now().fixed_offset())
        .await
}

async fn count_rows(db: &DatabaseConnection) -> (u64, u64, u64, u64, u64) {
    (
        locations::Entity::find().count(db).await.unwrap(),
        sensors::Entity::find().count(db).await.unwrap(),
        directions::Entity::find().count(db).await.unwrap(),
        count_events::Entity::find().count(db).await.unwrap(),
        status_events::Entity::find().count(db).await.unwrap(),
    )
}

#[tokio::test]
async fn first_count_creates_topology_and_one_event() {
    let ingestor = ingestor().await;

    let outcome = send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#)
        .await
        .expect("count stored");
    let Outcome::Count { event_id, location_id, sensor_id, direction_id } = outcome else {
        panic!("expected a count outcome, got {outcome:?}");
    };

    let db = ingestor.db();
    assert_eq!(count_rows(db).await, (1, 1, 1, 1, 0));

    let location = locations::Entity::find_by_id(location_id).one(db).await.unwrap().unwrap();
    assert_eq!(location.endpoint, "ENDPOINT1");
    assert_eq!(location.municipality, "Providencia");
    assert_eq!(location.equipment_type, "Totem");

    let sensor = sensors::Entity::find_by_id(sensor_id).one(db).await.unwrap().unwrap();
    assert_eq!(sensor.code, "BC01");
    assert_eq!(sensor.location_id, location_id);

    let direction = directions::Entity::find_by_id(direction_id).one(db).await.unwrap().unwrap();
    assert_eq!(direction.raw_direction, "North");
    assert_eq!(direction.sensor_id, sensor_id);
    assert_eq!(direction.reading_sense, None);

    let event = count_events::Entity::find_by_id(event_id).one(db).await.unwrap().unwrap();
    assert_eq!(event.quantity, 1);
    assert_eq!(event.municipality, "Providencia");
    assert_eq!(event.endpoint, "ENDPOINT1");
    assert_eq!(event.sensor_code, "BC01");
    assert_eq!(event.direction, "North");
    assert_eq!(event.reading_sense, None);
    assert!(!event.device_clock);
}

#[tokio::test]
async fn repeated_count_reuses_topology() {
    let ingestor = ingestor().await;

    let first = send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#).await.unwrap();
    let second = send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#).await.unwrap();

    match (first, second) {
        (
            Outcome::Count { event_id: e1, location_id: l1, sensor_id: s1, direction_id: d1 },
            Outcome::Count { event_id: e2, location_id: l2, sensor_id: s2, direction_id: d2 },
        ) => {
            assert_eq!((l1, s1, d1), (l2, s2, d2));
            assert_ne!(e1, e2);
        }
        other => panic!("expected two count outcomes, got {other:?}"),
    }

    assert_eq!(count_rows(ingestor.db()).await, (1, 1, 1, 2, 0));
}

#[tokio::test]
async fn sensors_are_scoped_to_their_location() {
    let ingestor = ingestor().await;

    send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#).await.unwrap();
    send(&ingestor, COUNT_TOPIC, r#"{"direction":"South"}"#).await.unwrap();
    send(&ingestor, "Bramal/Bicicla/Totem/Providencia/ENDPOINT2/BC01", r#"{"direction":"North"}"#)
        .await
        .unwrap();

    // Two locations, one BC01 at each, North and South on the first
    assert_eq!(count_rows(ingestor.db()).await, (2, 2, 3, 3, 0));
}

#[tokio::test]
async fn missing_or_broken_direction_is_recorded_as_unknown() {
    let ingestor = ingestor().await;

    send(&ingestor, COUNT_TOPIC, "{}").await.unwrap();
    send(&ingestor, COUNT_TOPIC, "definitely not json").await.unwrap();

    let db = ingestor.db();
    let directions = directions::Entity::find().all(db).await.unwrap();
    assert_eq!(directions.len(), 1);
    assert_eq!(directions[0].raw_direction, "Unknown");

    let unknown = count_events::Entity::find()
        .filter(count_events::Column::Direction.eq("Unknown"))
        .count(db)
        .await
        .unwrap();
    assert_eq!(unknown, 2);
}

#[tokio::test]
async fn device_reading_time_overrides_ingestion_time() {
    let ingestor = ingestor().await;

    let outcome = send(
        &ingestor,
        COUNT_TOPIC,
        r#"{"direction":"South","reading_date":"2024-03-05","reading_time":"08:15:00"}"#,
    )
    .await
    .unwrap();
    let Outcome::Count { event_id, .. } = outcome else {
        panic!("expected a count outcome, got {outcome:?}");
    };

    let event = count_events::Entity::find_by_id(event_id)
        .one(ingestor.db())
        .await
        .unwrap()
        .unwrap();
    assert!(event.device_clock);
    assert_eq!(event.reading_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    assert_eq!(event.reading_time, NaiveTime::from_hms_opt(8, 15, 0).unwrap());
}

#[tokio::test]
async fn operator_label_is_copied_onto_new_events() {
    let ingestor = ingestor().await;

    let Outcome::Count { direction_id, .. } =
        send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#).await.unwrap()
    else {
        panic!("expected a count outcome");
    };

    let db = ingestor.db();
    let direction = directions::Entity::find_by_id(direction_id).one(db).await.unwrap().unwrap();
    let mut labelled: directions::ActiveModel = direction.into();
    labelled.reading_sense = Set(Some("Towards downtown".to_string()));
    labelled.update(db).await.unwrap();

    let Outcome::Count { event_id, .. } =
        send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#).await.unwrap()
    else {
        panic!("expected a count outcome");
    };

    let event = count_events::Entity::find_by_id(event_id).one(db).await.unwrap().unwrap();
    assert_eq!(event.reading_sense.as_deref(), Some("Towards downtown"));
}

#[tokio::test]
async fn location_attributes_follow_latest_message() {
    let ingestor = ingestor().await;

    send(&ingestor, COUNT_TOPIC, r#"{"direction":"North"}"#).await.unwrap();
    send(&ingestor, "Bramal/Bicicla/Pole/Nunoa/ENDPOINT1/BC01", r#"{"direction":"North"}"#)
        .await
        .unwrap();

    let db = ingestor.db();
    let all = locations::Entity::find().all(db).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].municipality, "Nunoa");
    assert_eq!(all[0].equipment_type, "Pole");

    // Events keep the municipality they were received with
    let municipalities: Vec<String> = count_events::Entity::find()
        .all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.municipality)
        .collect();
    assert_eq!(municipalities, vec!["Providencia", "Nunoa"]);
}

#[tokio::test]
async fn status_heartbeat_is_stored() {
    let ingestor = ingestor().await;

    let outcome = send(
        &ingestor,
        STATUS_TOPIC,
        r#"{"device":"totem-01","timestamp":"2024-03-05T08:15:00Z","uptime":3600,"mqtt_connected":true,"dashboard_enabled":"true"}"#,
    )
    .await
    .unwrap();
    let Outcome::Status { event_id, location_id } = outcome else {
        panic!("expected a status outcome, got {outcome:?}");
    };

    let db = ingestor.db();
    assert_eq!(count_rows(db).await, (1, 0, 0, 0, 1));

    let event = status_events::Entity::find_by_id(event_id).one(db).await.unwrap().unwrap();
    assert_eq!(event.location_id, location_id);
    assert_eq!(event.device, "totem-01");
    assert_eq!(event.uptime.as_deref(), Some("3600"));
    assert!(event.mqtt_connected);
    assert!(event.dashboard_enabled);
    assert_eq!(event.reported_at.to_rfc3339(), "2024-03-05T08:15:00+00:00");
}

#[tokio::test]
async fn status_without_device_or_timestamp_writes_nothing() {
    let ingestor = ingestor().await;

    for payload in [
        r#"{"timestamp":"2024-03-05T08:15:00Z"}"#,
        r#"{"device":"totem-01"}"#,
        r#"{"device":"totem-01","timestamp":"later"}"#,
        "not json",
    ] {
        let err = send(&ingestor, STATUS_TOPIC, payload).await.expect_err(payload);
        assert!(matches!(err, IngestError::InvalidPayload(_)), "{payload}: {err}");
        assert!(!err.is_fatal());
    }

    assert_eq!(count_rows(ingestor.db()).await, (0, 0, 0, 0, 0));
}

#[tokio::test]
async fn unrecognized_topics_never_touch_the_store() {
    // Any store access would fail, and fatally after a single attempt
    let ingestor = Ingestor::new(StoreGuard::new(
        DatabaseConnection::Disconnected,
        RetryPolicy::new(Duration::from_secs(1), 1),
    ));

    let outcome = send(&ingestor, "Bramal/Bicicla/Totem/Providencia/ENDPOINT1/OT99", "{}")
        .await
        .expect("ignored, not failed");
    assert_eq!(outcome, Outcome::Ignored(Unrecognized::NotACounter("OT99".to_string())));

    let outcome = send(&ingestor, "Bramal/Bicicla/Totem", "{}").await.unwrap();
    assert_eq!(outcome, Outcome::Ignored(Unrecognized::SegmentCount(3)));

    let err = send(&ingestor, STATUS_TOPIC, "{}").await.expect_err("invalid status");
    assert!(matches!(err, IngestError::InvalidPayload(_)));

    assert_eq!(ingestor.store_health(), StoreHealth::Healthy);
}

#[tokio::test]
async fn lost_store_is_fatal_at_the_message_boundary() {
    let ingestor = Ingestor::new(StoreGuard::new(
        DatabaseConnection::Disconnected,
        RetryPolicy::new(Duration::from_secs(1), 1),
    ));

    let err = ingestor
        .handle(COUNT_TOPIC, br#"{"direction":"North"}"#)
        .await
        .expect_err("store is gone");

    assert!(err.is_fatal());
    assert!(matches!(err, IngestError::StoreUnavailable { failures: 1 }));
    assert_eq!(ingestor.store_health(), StoreHealth::Fatal);
}

#[tokio::test]
async fn message_boundary_contains_per_message_failures() {
    let ingestor = ingestor().await;

    ingestor.handle(STATUS_TOPIC, b"{}").await.expect("contained");
    ingestor
        .handle("Bramal/Bicicla/Totem/Providencia/ENDPOINT1/OT99", b"{}")
        .await
        .expect("ignored");
    ingestor
        .handle(COUNT_TOPIC, br#"{"direction":"North"}"#)
        .await
        .expect("stored");

    let stats = ingestor.stats().snapshot();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.counts_stored, 1);
    assert_eq!(stats.statuses_stored, 0);
}

#[tokio::test]
async fn lost_creation_race_is_replayed_once() {
    let (ingestor, db) = racing_ingestor(1).await;

    ingestor
        .handle(COUNT_TOPIC, br#"{"direction":"North"}"#)
        .await
        .expect("stored on replay");

    let stats = ingestor.stats().snapshot();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.counts_stored, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(count_rows(&db).await, (1, 1, 1, 1, 0));
}

#[tokio::test]
async fn second_lost_race_fails_the_message_without_rows() {
    let (ingestor, db) = racing_ingestor(2).await;

    ingestor
        .handle(COUNT_TOPIC, br#"{"direction":"North"}"#)
        .await
        .expect("contained");

    let stats = ingestor.stats().snapshot();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.counts_stored, 0);
    assert_eq!(count_rows(&db).await, (0, 0, 0, 0, 0));
}

#[tokio::test]
async fn failed_event_insert_rolls_back_new_topology() {
    let ingestor = ingestor().await;
    ingestor
        .db()
        .execute_unprepared(
            "CREATE TRIGGER reject_count_events BEFORE INSERT ON count_events \
             BEGIN SELECT RAISE(ABORT, 'count events rejected'); END",
        )
        .await
        .unwrap();

    ingestor
        .handle(COUNT_TOPIC, br#"{"direction":"North"}"#)
        .await
        .expect("contained");

    let stats = ingestor.stats().snapshot();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(count_rows(ingestor.db()).await, (0, 0, 0, 0, 0));
}

#[tokio::test]
async fn long_topic_segments_and_directions_are_stored_whole() {
    let ingestor = ingestor().await;
    let endpoint = "E".repeat(300);
    let sensor_code = format!("BC{}", "7".repeat(298));
    let direction = "N".repeat(500);
    let topic = format!("Bramal/Bicicla/Totem/Providencia/{endpoint}/{sensor_code}");
    let payload = format!(r#"{{"direction":"{direction}"}}"#);

    let outcome = send(&ingestor, &topic, &payload).await.expect("count stored");
    let Outcome::Count { event_id, .. } = outcome else {
        panic!("expected a count outcome, got {outcome:?}");
    };

    let event = count_events::Entity::find_by_id(event_id)
        .one(ingestor.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.endpoint, endpoint);
    assert_eq!(event.sensor_code, sensor_code);
    assert_eq!(event.direction, direction);
}
