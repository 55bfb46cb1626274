use database::{DbConnector, PoolSettings, RetryPolicy};
use std::sync::Arc;

pub mod config;
pub mod context;
pub mod error;
pub mod middleware;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, Settings};
pub use context::{DbSession, RequestContext, RequestId};
pub use error::{AppError, ErrorBody, ErrorCode};

#[derive(Clone)]
pub struct AppState {
    pub db: DbConnector,
    pub config: Settings,
}

impl AppState {
    /// Wires the connector from the settings. Nothing is opened yet.
    pub fn new(config: Settings) -> Self {
        let db = DbConnector::new(
            config.database_url.clone(),
            PoolSettings::default(),
            RetryPolicy::default(),
        );
        Self { db, config }
    }
}

// do not add #[cfg(test)] here because it hides this function from other crates.
pub fn get_test_state(db: DbConnector) -> Arc<AppState> {
    Arc::new(AppState {
        db,
        config: Settings::default(),
    })
}
