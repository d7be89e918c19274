use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "directions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub sensor_id: i32,
    #[sea_orm(column_type = "Text")]
    pub raw_direction: String,
    /// Operator-assigned label, written by the management API only.
    #[sea_orm(column_type = "Text")]
    pub reading_sense: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sensors::Entity",
        from = "Column::SensorId",
        to = "super::sensors::Column::Id"
    )]
    Sensor,
    #[sea_orm(has_many = "super::count_events::Entity")]
    CountEvents,
}

impl Related<super::sensors::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sensor.def()
    }
}

impl Related<super::count_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CountEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
