//! The ingestion core: from an MQTT topic and payload to committed rows.

pub mod payload;
pub mod persister;
pub mod pipeline;
pub mod resolver;
pub mod stats;
pub mod topic;

pub use pipeline::{Ingestor, Outcome};
pub use stats::{IngestStats, IngestStatsSnapshot};
pub use topic::{classify, TopicKind};
