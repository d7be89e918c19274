use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Deployment {
    Local,
    Dev,
    Stage,
    Prod,
}

impl Deployment {
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Self::Dev,
            "stage" | "staging" => Self::Stage,
            "prod" | "production" => Self::Prod,
            _ => Self::Local,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub db_pool_max: u32,
    pub db_acquire_timeout_seconds: u64,
    pub db_retry_max_delay_seconds: u64,

    // MQTT broker
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic_filter: String,
    /// MQTT keep-alive interval. Pings are only sent while the session polls
    /// the transport, and messages are stored inline, so a store outage that
    /// keeps `StoreGuard::acquire` retrying for longer than 1.5 times this
    /// interval lets the broker drop the link. That surfaces as one counted
    /// disconnect followed by a normal reconnect.
    pub mqtt_keep_alive_seconds: u64,
    pub mqtt_retry_max_delay_seconds: u64,

    // Failure escalation
    pub critical_failure_count: u32,
    pub max_subscriber_restarts: u32,
    pub subscriber_restart_delay_seconds: u64,

    // Operational HTTP endpoints
    pub api_host: String,
    pub api_port: u16,

    // Application metadata
    pub deployment: Deployment,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if required environment variables are not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        // Client ids must be unique per broker; suffixed with the process id below
        let client_id_base =
            env::var("MQTT_CLIENT_ID").unwrap_or_else(|_| "bicicla-backend".to_string());

        Ok(Self {
            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            db_pool_max: env::var("DB_POOL_MAX")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            db_acquire_timeout_seconds: env::var("DB_ACQUIRE_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            db_retry_max_delay_seconds: env::var("DB_RETRY_MAX_DELAY_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // MQTT broker
            mqtt_broker: env::var("MQTT_BROKER").unwrap_or_else(|_| "localhost".to_string()),
            mqtt_port: env::var("MQTT_PORT")
                .unwrap_or_else(|_| "1883".to_string())
                .parse()
                .unwrap_or(1883),
            mqtt_user: env::var("MQTT_USER").ok().filter(|v| !v.is_empty()),
            mqtt_password: env::var("MQTT_PASSWORD").ok().filter(|v| !v.is_empty()),
            mqtt_client_id: format!("{client_id_base}-{}", std::process::id()),
            mqtt_topic_filter: env::var("MQTT_TOPIC_FILTER")
                .unwrap_or_else(|_| "Bramal/Bicicla/#".to_string()),
            mqtt_keep_alive_seconds: env::var("MQTT_KEEP_ALIVE_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            mqtt_retry_max_delay_seconds: env::var("MQTT_RETRY_MAX_DELAY_SECONDS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            // Failure escalation
            critical_failure_count: env::var("CRITICAL_FAILURE_COUNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            max_subscriber_restarts: env::var("MAX_SUBSCRIBER_RESTARTS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            subscriber_restart_delay_seconds: env::var("SUBSCRIBER_RESTART_DELAY_SECONDS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),

            // Operational HTTP endpoints
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),

            // Application metadata
            deployment: Deployment::from_str(
                &env::var("DEPLOYMENT").unwrap_or_else(|_| "local".to_string()),
            ),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Broker credentials, only when both user and password are configured.
    #[must_use]
    pub fn mqtt_credentials(&self) -> Option<(&str, &str)> {
        match (&self.mqtt_user, &self.mqtt_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }

    #[must_use]
    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_seconds)
    }

    #[must_use]
    pub fn db_retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.db_retry_max_delay_seconds)
    }

    #[must_use]
    pub fn mqtt_retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.mqtt_retry_max_delay_seconds)
    }

    #[must_use]
    pub fn subscriber_restart_delay(&self) -> Duration {
        Duration::from_secs(self.subscriber_restart_delay_seconds)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
