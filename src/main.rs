use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pathways_core::PathwayService;
use pathways_core::config::export_config_from_env_values;

/// Main entry point for the clinical pathways service
///
/// Resolves the export configuration once, then serves the REST API until interrupted.
///
/// # Environment Variables
/// - `PATHWAYS_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `PATHWAYS_BASE_URL`: base URL of exported FHIR resources (default: "http://example.com")
/// - `PATHWAYS_FHIR_VERSION`: FHIR version written into generated CQL (default: "4.0.1")
/// - `PATHWAYS_PUBLISHER`: publisher written onto exported resources (optional)
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration is invalid or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pathways_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = export_config_from_env_values(
        std::env::var("PATHWAYS_BASE_URL").ok(),
        std::env::var("PATHWAYS_FHIR_VERSION").ok(),
        std::env::var("PATHWAYS_PUBLISHER").ok(),
    )?;
    let rest_addr: SocketAddr = std::env::var("PATHWAYS_REST_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".into())
        .parse()?;

    tracing::info!("++ Starting pathways REST on {}", rest_addr);
    tracing::info!("++ Exporting resources under {}", config.base_url());

    let app = api_rest::router(PathwayService::new(config));
    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("-- Shutting down");
        })
        .await?;

    Ok(())
}
