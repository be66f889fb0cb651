//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the clinic REST API on its own.
//!
//! ## Intended use
//! Useful for development and debugging. The workspace's main `clinic-run` binary runs the same
//! router with graceful shutdown.

use api_rest::{router, ServerSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the clinic REST API server.
///
/// Configuration is read once from the environment (see [`ServerSettings::from_env`]).
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - a configuration value is invalid or the database cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServerSettings::from_env()?;
    let addr = settings.rest_addr.clone();
    let app = router(settings.into_state()?);

    tracing::info!("-- Starting clinic REST API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
