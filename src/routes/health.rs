use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::AppState;
use crate::ingest::IngestStatsSnapshot;
use crate::mqtt::LinkState;
use crate::resilience::StoreHealth;

/// Liveness check for the orchestrator.
///
/// Returns 503 once the subscriber restart budget is spent and ingestion has
/// stopped, so an orchestrator can replace the process.
pub async fn healthz(State(state): State<AppState>) -> StatusCode {
    if state.supervisor.is_paused() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub deployment: String,
    pub started_at: DateTime<Utc>,
    pub broker: BrokerStatus,
    pub store: StoreHealth,
    pub subscriber: SubscriberStatus,
    pub messages: IngestStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct BrokerStatus {
    pub link: LinkState,
    pub consecutive_disconnects: u32,
    pub reconnects: u64,
    pub topic_filter: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriberStatus {
    pub restarts: u32,
    pub paused: bool,
}

/// Snapshot of the ingestion pipeline.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        deployment: format!("{:?}", state.config.deployment).to_lowercase(),
        started_at: state.started_at,
        broker: BrokerStatus {
            link: state.session.link_state(),
            consecutive_disconnects: state.session.consecutive_disconnects(),
            reconnects: state.session.reconnects(),
            topic_filter: state.config.mqtt_topic_filter.clone(),
        },
        store: state.ingestor.store_health(),
        subscriber: SubscriberStatus {
            restarts: state.supervisor.restarts(),
            paused: state.supervisor.is_paused(),
        },
        messages: state.ingestor.stats().snapshot(),
    })
}
