use std::future::IntoFuture;
use std::sync::Arc;

use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bicicla_ingest::common::AppState;
use bicicla_ingest::config::Config;
use bicicla_ingest::ingest::Ingestor;
use bicicla_ingest::mqtt::{MqttTransport, Session, SessionSettings};
use bicicla_ingest::resilience::{RetryPolicy, StoreGuard};
use bicicla_ingest::routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (fail-fast)
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,bicicla_ingest=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        deployment = ?config.deployment,
        broker = %config.mqtt_broker,
        port = config.mqtt_port,
        client_id = %config.mqtt_client_id,
        "Starting bicicla-ingest..."
    );

    // Connect to database (fail-fast)
    tracing::info!("Connecting to database...");
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.db_pool_max)
        .acquire_timeout(config.db_acquire_timeout())
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    tracing::info!("Database connection established");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Migrations completed");

    let store = StoreGuard::new(
        db,
        RetryPolicy::new(config.db_retry_max_delay(), config.critical_failure_count),
    );
    let state = AppState::new(config.clone(), Ingestor::new(store));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // Operational endpoints
    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting server");
    let listener = TcpListener::bind(&addr).await?;
    let server = tokio::spawn(
        axum::serve(listener, routes::build_router(state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future(),
    );

    // Subscriber, recreated by the supervisor on non-fatal failures
    let settings = SessionSettings {
        topic_filter: config.mqtt_topic_filter.clone(),
        retry: RetryPolicy::new(config.mqtt_retry_max_delay(), config.critical_failure_count),
    };
    let factory = {
        let state = state.clone();
        move |token: CancellationToken| {
            let transport = MqttTransport::new(&state.config);
            let session = Session::new(
                transport,
                Arc::clone(&state.ingestor),
                Arc::clone(&state.session),
                settings.clone(),
            );
            session.run(token)
        }
    };
    let outcome = state.supervisor.run(factory, shutdown.clone()).await;

    // Stop the HTTP server whatever ended the subscriber
    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Server error"),
        Err(e) => tracing::error!(error = %e, "Server task failed"),
        Ok(Ok(())) => {}
    }

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Exiting after fatal ingestion failure");
        return Err(e.into());
    }

    tracing::info!("Shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
