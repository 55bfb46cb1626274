use sqlx::AnyPool;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use std::time::Duration;

mod connector;

pub use connector::{ConnectError, DbConnector, RetryPolicy};
pub use sqlx::Error;
pub use sqlx::Result;

// --- Driver Adapter Pattern ---
// The concrete driver is picked from the URL scheme at connect time
// (mysql:// in production, sqlite: locally and in tests).
pub type Driver = sqlx::Any;
pub type Pool = AnyPool;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database unavailable: {0}")]
    Unavailable(sqlx::Error),
    #[error("Database error: {0}")]
    Infrastructure(sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Unavailable(err)
            }
            _ => RepositoryError::Infrastructure(err),
        }
    }
}

/// Fixed pool limits, applied once when the pool is built.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            min_connections: 10,
            max_lifetime: Duration::from_secs(60 * 60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    pub pool: Pool,
}

impl Database {
    pub async fn new(options: AnyConnectOptions, settings: &PoolSettings) -> sqlx::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .max_lifetime(settings.max_lifetime)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Round-trips a trivial statement to prove the pool can reach the server.
    #[tracing::instrument(skip(self))]
    pub async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// URL that can never be opened: the parent directory does not exist and
/// SQLite is not asked to create anything.
pub const UNREACHABLE_TEST_URL: &str = "sqlite:///nonexistent-dir/unreachable.db";

// do not add #[cfg(test)] here because it hides this function from other crates.
pub fn get_test_connector() -> DbConnector {
    DbConnector::new(
        Some("sqlite::memory:".to_string()),
        test_pool_settings(),
        RetryPolicy::none(),
    )
}

pub fn get_unreachable_connector() -> DbConnector {
    DbConnector::new(
        Some(UNREACHABLE_TEST_URL.to_string()),
        test_pool_settings(),
        RetryPolicy::none(),
    )
}

fn test_pool_settings() -> PoolSettings {
    PoolSettings {
        max_connections: 1, // Single connection is safer for SQLite tests
        min_connections: 0,
        acquire_timeout: Duration::from_secs(5),
        ..PoolSettings::default()
    }
}
