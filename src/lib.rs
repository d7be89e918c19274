//! BICICLA ingest - MQTT ingestion for bicycle-counting sensors
//!
//! This library exposes the core modules for testing and reuse.

pub mod common;
pub mod config;
pub mod entity;
pub mod error;
pub mod ingest;
pub mod mqtt;
pub mod resilience;
pub mod routes;
