mod server;

use common::{AppState, Settings, telemetry};
use server::ServerOptions;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load Config from the environment (.env first, if present)
    dotenvy::dotenv().ok();
    let config = Settings::load().unwrap_or_else(|e| e.exit());

    // 2. Initialize Logging
    telemetry::init(&config)?;
    tracing::info!(env = %config.env, port = config.port, "Configuration loaded");

    // 3. Initialize Database
    let state = Arc::new(AppState::new(config));
    if state.db.is_configured() {
        if let Err(e) = state.db.connect().await {
            tracing::error!(error = %e, "Unable to initialize database, exiting");
            return Err(e.into());
        }
    } else {
        tracing::warn!("DATABASE_URL is not set! /v1/api/health/db will report the database as unavailable.");
    }

    // 4. Start Server
    if let Err(e) = server::run(state, ServerOptions::default()).await {
        tracing::error!(error = %e, "Server terminated");
        return Err(e.into());
    }

    Ok(())
}
