use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::ingest::Ingestor;
use crate::mqtt::{SessionMonitor, Supervisor, SupervisorSettings};

/// Handles shared between the subscriber and the operational endpoints.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingestor: Arc<Ingestor>,
    pub session: Arc<SessionMonitor>,
    pub supervisor: Arc<Supervisor>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config, ingestor: Ingestor) -> Self {
        let supervisor = Supervisor::new(SupervisorSettings {
            max_restarts: config.max_subscriber_restarts,
            restart_delay: config.subscriber_restart_delay(),
        });

        Self {
            config: Arc::new(config),
            ingestor: Arc::new(ingestor),
            session: Arc::new(SessionMonitor::default()),
            supervisor: Arc::new(supervisor),
            started_at: Utc::now(),
        }
    }
}
