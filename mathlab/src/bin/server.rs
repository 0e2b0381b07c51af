//! MathLab server binary

use anyhow::{Context, Result};
use mathlab::api::{create_router, ApiState};
use mathlab::{LabConfig, MathLab};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "mathlab.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting MathLab Server v{}", env!("CARGO_PKG_VERSION"));

    // An explicit path must exist; the default one is optional
    let explicit = std::env::args().nth(1);
    let config_path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = if explicit.is_some() || Path::new(&config_path).exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let config = LabConfig::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;
        info!(config_path = %config_path, "Loaded configuration");
        config
    } else {
        info!("No {} found, using defaults", DEFAULT_CONFIG);
        LabConfig::default()
    };

    info!(
        provider = %config.model.provider,
        model = %config.model.model,
        max_commands = config.sandbox.max_commands,
        timeout_ms = config.sandbox.timeout_ms,
        "Configuration"
    );

    let lab = MathLab::from_config(&config).context("Failed to create model client")?;
    if let Some(warning) = lab.config_warning() {
        warn!("{}", warning);
    }

    let state = Arc::new(ApiState { lab: Arc::new(lab) });
    let app = create_router(state);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind))?;
    info!("Listening on http://{}", addr);
    info!("Open http://{}/ in a browser", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
