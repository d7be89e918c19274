use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "count_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub received_at: DateTimeWithTimeZone,
    pub reading_date: Date,
    pub reading_time: Time,
    /// True when `reading_date`/`reading_time` came from the device clock.
    pub device_clock: bool,
    pub location_id: i32,
    pub sensor_id: i32,
    pub direction_id: i32,
    #[sea_orm(column_type = "Text")]
    pub municipality: String,
    #[sea_orm(column_type = "Text")]
    pub endpoint: String,
    #[sea_orm(column_type = "Text")]
    pub sensor_code: String,
    #[sea_orm(column_type = "Text")]
    pub direction: String,
    #[sea_orm(column_type = "Text")]
    pub reading_sense: Option<String>,
    pub quantity: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::locations::Entity",
        from = "Column::LocationId",
        to = "super::locations::Column::Id"
    )]
    Location,
    #[sea_orm(
        belongs_to = "super::sensors::Entity",
        from = "Column::SensorId",
        to = "super::sensors::Column::Id"
    )]
    Sensor,
    #[sea_orm(
        belongs_to = "super::directions::Entity",
        from = "Column::DirectionId",
        to = "super::directions::Column::Id"
    )]
    Direction,
}

impl Related<super::locations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

impl Related<super::sensors::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sensor.def()
    }
}

impl Related<super::directions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Direction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
