use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "locations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique, column_type = "Text")]
    pub endpoint: String,
    #[sea_orm(column_type = "Text")]
    pub municipality: String,
    #[sea_orm(column_type = "Text")]
    pub equipment_type: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sensors::Entity")]
    Sensors,
    #[sea_orm(has_many = "super::count_events::Entity")]
    CountEvents,
    #[sea_orm(has_many = "super::status_events::Entity")]
    StatusEvents,
}

impl Related<super::sensors::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sensors.def()
    }
}

impl Related<super::count_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CountEvents.def()
    }
}

impl Related<super::status_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
