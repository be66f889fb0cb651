//! Main clinic server.
//!
//! Opens the clinic database, then serves the REST API (with Swagger UI) until interrupted.

use api_rest::{router, ServerSettings};
use api_shared::HealthService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the clinic application.
///
/// # Environment Variables
/// - `CLINIC_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CLINIC_DATABASE_PATH`: SQLite database file (default: "clinic.db")
/// - `CLINIC_BUSY_TIMEOUT_MS`: how long a transaction waits for the write lock
/// - `CLINIC_MAX_CONFLICT_RETRIES`: retries for serialization conflicts
/// - `CLINIC_UNLOCK_ROLES`, `CLINIC_DISCHARGE_ROLES`, `CLINIC_FINAL_DISCHARGE_ROLES`: role lists
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If startup or serving fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinic=info".parse()?)
                .add_directive("clinic_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServerSettings::from_env()?;
    let rest_addr = settings.rest_addr.clone();
    tracing::info!(
        database = %settings.core.database_path().display(),
        "++ Opening clinic store"
    );
    let app = router(settings.into_state()?);

    tracing::info!("++ Starting clinic REST on {}", rest_addr);
    tracing::info!("{}", HealthService::check_health().message);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("-- Clinic REST stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
}
