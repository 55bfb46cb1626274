use common::DbSession;
use database::{ConnectError, RepositoryError};
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Database unavailable: {0}")]
    Unavailable(#[from] ConnectError),
    #[error("Database check failed: {0}")]
    Query(#[from] RepositoryError),
}

pub struct HealthService;

impl HealthService {
    /// Acquires the request's database handle and runs `SELECT 1` on it.
    #[instrument(skip(db))]
    pub async fn check_database(db: &DbSession) -> Result<(), HealthError> {
        let database = db.database().await?;
        database.ping().await?;
        Ok(())
    }
}
