use crate::{Database, PoolSettings};
use sqlx::any::AnyConnectOptions;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    #[error("DATABASE_URL is not configured")]
    MissingUrl,
    #[error("Invalid database url: {0}")]
    InvalidUrl(String),
    #[error("Failed to connect to database after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        source: Arc<sqlx::Error>,
    },
}

/// Fixed-delay retry bounds for the initial pool open.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

/// Lazily opens the process-wide pool.
///
/// Cloning is cheap and every clone shares the same gate, so the first caller
/// of [`DbConnector::connect`] drives the open and everyone else (including
/// callers that arrive while it is still in progress) receives the same
/// `Database` or the same `ConnectError`. A failed open is not retried by
/// later callers.
#[derive(Clone)]
pub struct DbConnector {
    inner: Arc<Inner>,
}

struct Inner {
    database_url: Option<String>,
    pool_settings: PoolSettings,
    retry: RetryPolicy,
    cell: OnceCell<Result<Database, ConnectError>>,
    attempts: AtomicU32,
}

impl DbConnector {
    pub fn new(database_url: Option<String>, pool_settings: PoolSettings, retry: RetryPolicy) -> Self {
        // Idempotent; registers the mysql and sqlite drivers behind `Any`.
        sqlx::any::install_default_drivers();

        Self {
            inner: Arc::new(Inner {
                database_url: database_url.filter(|url| !url.trim().is_empty()),
                pool_settings,
                retry,
                cell: OnceCell::new(),
                attempts: AtomicU32::new(0),
            }),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.database_url.is_some()
    }

    /// Returns the shared handle, opening the pool on first use.
    pub async fn connect(&self) -> Result<Database, ConnectError> {
        self.inner
            .cell
            .get_or_init(|| self.open_with_retry())
            .await
            .clone()
    }

    /// The handle if initialization already finished successfully.
    pub fn get(&self) -> Option<Database> {
        match self.inner.cell.get() {
            Some(Ok(db)) => Some(db.clone()),
            _ => None,
        }
    }

    /// Number of pool opens attempted so far in this process.
    pub fn open_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    async fn open_with_retry(&self) -> Result<Database, ConnectError> {
        let url = self
            .inner
            .database_url
            .as_deref()
            .ok_or(ConnectError::MissingUrl)?;
        let options = AnyConnectOptions::from_str(url)
            .map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;

        let RetryPolicy { max_attempts, delay } = self.inner.retry.clone();
        let max_attempts = max_attempts.max(1);
        tracing::info!(max_attempts, "Connecting to database");

        let mut attempt = 1;
        loop {
            self.inner.attempts.fetch_add(1, Ordering::SeqCst);
            match Database::new(options.clone(), &self.inner.pool_settings).await {
                Ok(db) => {
                    tracing::info!(attempt, "Database connection pool ready");
                    return Ok(db);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Failed to connect to database, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Giving up connecting to database");
                    return Err(ConnectError::Exhausted {
                        attempts: attempt,
                        source: Arc::new(e),
                    });
                }
            }
        }
    }
}
