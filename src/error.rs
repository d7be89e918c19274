use sea_orm::{DbErr, SqlErr};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::mqtt::TransportError),

    #[error("Message handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Subscriber task panicked: {0}")]
    SubscriberPanicked(String),

    #[error("Store unavailable after {failures} consecutive connection failures")]
    StoreUnavailable { failures: u32 },

    #[error("Broker unavailable after {disconnects} consecutive disconnects")]
    BrokerUnavailable { disconnects: u32 },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl IngestError {
    /// Fatal errors end the process; an external supervisor restarts it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::BrokerUnavailable { .. }
        )
    }

    /// A losing insert in a race between two creators of the same entity.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(e) => matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))),
            _ => false,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
