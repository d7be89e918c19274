use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========== LOCATIONS ==========
        manager
            .create_table(
                Table::create()
                    .table(Locations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Locations::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Locations::Endpoint)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Locations::Municipality).text().not_null())
                    .col(ColumnDef::new(Locations::EquipmentType).text().not_null())
                    .col(
                        ColumnDef::new(Locations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Locations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== SENSORS ==========
        manager
            .create_table(
                Table::create()
                    .table(Sensors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sensors::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Sensors::Code).text().not_null())
                    .col(ColumnDef::new(Sensors::LocationId).integer().not_null())
                    .col(
                        ColumnDef::new(Sensors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sensors_location")
                            .from(Sensors::Table, Sensors::LocationId)
                            .to(Locations::Table, Locations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // A sensor code is only unique within its location
        manager
            .create_index(
                Index::create()
                    .name("idx_sensors_location_code")
                    .table(Sensors::Table)
                    .col(Sensors::LocationId)
                    .col(Sensors::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ========== DIRECTIONS ==========
        manager
            .create_table(
                Table::create()
                    .table(Directions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Directions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Directions::SensorId).integer().not_null())
                    .col(ColumnDef::new(Directions::RawDirection).text().not_null())
                    .col(ColumnDef::new(Directions::ReadingSense).text())
                    .col(
                        ColumnDef::new(Directions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_directions_sensor")
                            .from(Directions::Table, Directions::SensorId)
                            .to(Sensors::Table, Sensors::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_directions_sensor_raw")
                    .table(Directions::Table)
                    .col(Directions::SensorId)
                    .col(Directions::RawDirection)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ========== COUNT EVENTS ==========
        manager
            .create_table(
                Table::create()
                    .table(CountEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CountEvents::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CountEvents::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CountEvents::ReadingDate).date().not_null())
                    .col(ColumnDef::new(CountEvents::ReadingTime).time().not_null())
                    .col(
                        ColumnDef::new(CountEvents::DeviceClock)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CountEvents::LocationId).integer().not_null())
                    .col(ColumnDef::new(CountEvents::SensorId).integer().not_null())
                    .col(ColumnDef::new(CountEvents::DirectionId).integer().not_null())
                    .col(ColumnDef::new(CountEvents::Municipality).text().not_null())
                    .col(ColumnDef::new(CountEvents::Endpoint).text().not_null())
                    .col(ColumnDef::new(CountEvents::SensorCode).text().not_null())
                    .col(ColumnDef::new(CountEvents::Direction).text().not_null())
                    .col(ColumnDef::new(CountEvents::ReadingSense).text())
                    .col(
                        ColumnDef::new(CountEvents::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_count_events_location")
                            .from(CountEvents::Table, CountEvents::LocationId)
                            .to(Locations::Table, Locations::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_count_events_sensor")
                            .from(CountEvents::Table, CountEvents::SensorId)
                            .to(Sensors::Table, Sensors::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_count_events_direction")
                            .from(CountEvents::Table, CountEvents::DirectionId)
                            .to(Directions::Table, Directions::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // The reporting side filters by location and reading day
        manager
            .create_index(
                Index::create()
                    .name("idx_count_events_location_date")
                    .table(CountEvents::Table)
                    .col(CountEvents::LocationId)
                    .col(CountEvents::ReadingDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_count_events_received_at")
                    .table(CountEvents::Table)
                    .col(CountEvents::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        // ========== STATUS EVENTS ==========
        manager
            .create_table(
                Table::create()
                    .table(StatusEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StatusEvents::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StatusEvents::LocationId).integer().not_null())
                    .col(ColumnDef::new(StatusEvents::Device).text().not_null())
                    .col(ColumnDef::new(StatusEvents::Uptime).text())
                    .col(
                        ColumnDef::new(StatusEvents::MqttConnected)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(StatusEvents::DashboardEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(StatusEvents::ReportedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StatusEvents::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_status_events_location")
                            .from(StatusEvents::Table, StatusEvents::LocationId)
                            .to(Locations::Table, Locations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_status_events_location_reported")
                    .table(StatusEvents::Table)
                    .col(StatusEvents::LocationId)
                    .col(StatusEvents::ReportedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Facts first, then topology leaves to roots
        manager
            .drop_table(Table::drop().table(StatusEvents::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CountEvents::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Directions::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sensors::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Locations::Table).if_exists().to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum Locations {
    Table,
    Id,
    Endpoint,
    Municipality,
    EquipmentType,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum Sensors {
    Table,
    Id,
    Code,
    LocationId,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Directions {
    Table,
    Id,
    SensorId,
    RawDirection,
    ReadingSense,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum CountEvents {
    Table,
    Id,
    ReceivedAt,
    ReadingDate,
    ReadingTime,
    DeviceClock,
    LocationId,
    SensorId,
    DirectionId,
    Municipality,
    Endpoint,
    SensorCode,
    Direction,
    ReadingSense,
    Quantity,
}

#[derive(DeriveIden)]
pub enum StatusEvents {
    Table,
    Id,
    LocationId,
    Device,
    Uptime,
    MqttConnected,
    DashboardEnabled,
    ReportedAt,
    ReceivedAt,
}
