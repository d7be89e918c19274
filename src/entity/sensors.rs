use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sensors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Text")]
    pub code: String,
    pub location_id: i32,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::locations::Entity",
        from = "Column::LocationId",
        to = "super::locations::Column::Id"
    )]
    Location,
    #[sea_orm(has_many = "super::directions::Entity")]
    Directions,
    #[sea_orm(has_many = "super::count_events::Entity")]
    CountEvents,
}

impl Related<super::locations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

impl Related<super::directions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Directions.def()
    }
}

impl Related<super::count_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CountEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
