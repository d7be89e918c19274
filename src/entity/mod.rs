//! SeaORM entities for the counting topology and the append-only fact tables.

pub mod count_events;
pub mod directions;
pub mod locations;
pub mod sensors;
pub mod status_events;
