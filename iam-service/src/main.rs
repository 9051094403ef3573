use iam_service::{
    build_router,
    clock::SystemClock,
    config::{Environment, IamConfig},
    store::Stores,
    tasks::BackgroundTasks,
    AppState, IamCore,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::logging::{init_tracing, shutdown_tracing};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = IamConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    iam_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting IAM service"
    );

    let stores = connect_stores(&config).await?;
    let core = IamCore::build(&config, stores, Arc::new(SystemClock))?;
    let tasks = BackgroundTasks::spawn(&core, &config);

    let addr = config.common.socket_addr();
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
    let app = build_router(AppState::new(config, core));

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if tokio::time::timeout(grace, tasks.shutdown()).await.is_err() {
        tracing::warn!(grace_seconds = grace.as_secs(), "Background tasks did not stop in time");
    }

    tracing::info!("Service shutdown complete");
    shutdown_tracing();
    Ok(())
}

async fn connect_stores(config: &IamConfig) -> Result<Stores, AppError> {
    let Some(url) = config.database.connection_string.as_ref() else {
        if config.environment == Environment::Prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DB_CONNECTION_STRING is required in production"
            )));
        }
        tracing::warn!("No database configured; using the in-memory store");
        return Ok(Stores::in_memory());
    };

    tracing::info!(
        max_connections = config.database.max_connections,
        "Connecting to PostgreSQL"
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url.expose_secret())
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("connect: {}", e)))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("migrations: {}", e)))?;
    tracing::info!("Database initialized successfully");

    Ok(Stores::postgres(pool))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
