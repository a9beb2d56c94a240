//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, without loading a `.env` file.
//!
//! ## Intended use
//! Useful for development when only the HTTP surface is needed. The workspace's main
//! `pathways-run` binary is the one meant for deployment.

use pathways_core::config::export_config_from_env_values;
use pathways_core::PathwayService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("api_rest=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = export_config_from_env_values(
        std::env::var("PATHWAYS_BASE_URL").ok(),
        std::env::var("PATHWAYS_FHIR_VERSION").ok(),
        std::env::var("PATHWAYS_PUBLISHER").ok(),
    )?;
    let rest_addr = std::env::var("PATHWAYS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("++ Starting pathways REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, api_rest::router(PathwayService::new(config))).await?;
    Ok(())
}
