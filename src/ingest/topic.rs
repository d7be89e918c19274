//! Topic grammar for the counting network.
//!
//! ```text
//! <root>/<root2>/<equipment_type>/<municipality>/<endpoint>/<sensor_code>     count
//! <root>/<root2>/<equipment_type>/<municipality>/<endpoint>/control/status    status
//! ```
//!
//! Classification is pure; nothing here touches the store.

use std::fmt;

/// Only sensor codes with this prefix are bicycle counters.
pub const COUNTER_PREFIX: &str = "BC";

const STATUS_CHANNEL: [&str; 2] = ["control", "status"];

/// Where a message comes from, shared by both message kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationKey {
    pub equipment_type: String,
    pub municipality: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountTopic {
    pub location: LocationKey,
    /// Trimmed and upper-cased.
    pub sensor_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTopic {
    pub location: LocationKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unrecognized {
    SegmentCount(usize),
    NotACounter(String),
    UnknownChannel,
}

impl fmt::Display for Unrecognized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCount(n) => write!(f, "unexpected segment count {n}"),
            Self::NotACounter(code) => write!(f, "sensor {code} is not a {COUNTER_PREFIX} counter"),
            Self::UnknownChannel => write!(f, "7-segment topic is not a control/status channel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    Count(CountTopic),
    Status(StatusTopic),
    Unrecognized(Unrecognized),
}

/// Classify a raw topic into a count event, a status heartbeat or noise.
#[must_use]
pub fn classify(topic: &str) -> TopicKind {
    let parts: Vec<&str> = topic.split('/').collect();

    match parts.as_slice() {
        [_, _, equipment_type, municipality, endpoint, sensor] => {
            let sensor_code = sensor.trim().to_uppercase();
            if !sensor_code.starts_with(COUNTER_PREFIX) {
                return TopicKind::Unrecognized(Unrecognized::NotACounter(sensor_code));
            }
            TopicKind::Count(CountTopic {
                location: location_key(equipment_type, municipality, endpoint),
                sensor_code,
            })
        }
        [_, _, equipment_type, municipality, endpoint, channel, kind] => {
            if [*channel, *kind] != STATUS_CHANNEL {
                return TopicKind::Unrecognized(Unrecognized::UnknownChannel);
            }
            TopicKind::Status(StatusTopic {
                location: location_key(equipment_type, municipality, endpoint),
            })
        }
        _ => TopicKind::Unrecognized(Unrecognized::SegmentCount(parts.len())),
    }
}

fn location_key(equipment_type: &str, municipality: &str, endpoint: &str) -> LocationKey {
    LocationKey {
        equipment_type: equipment_type.to_string(),
        municipality: municipality.to_string(),
        endpoint: endpoint.to_string(),
    }
}
