use crate::error::{AppError, ErrorCode};
use axum::{extract::FromRequestParts, http::request::Parts};
use database::{ConnectError, Database, DbConnector};
use std::fmt;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id of the current request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request view of the shared database.
#[derive(Clone)]
pub struct DbSession {
    connector: DbConnector,
}

impl DbSession {
    pub fn new(connector: DbConnector) -> Self {
        Self { connector }
    }

    /// The process-wide handle. The first call in the process opens the pool;
    /// queries issued through it are traced inside the current request span.
    pub async fn database(&self) -> Result<Database, ConnectError> {
        let db = self.connector.connect().await?;
        tracing::debug!("Database handle bound to request");
        Ok(db)
    }
}

/// Everything the middleware chain contributes to a request, gathered into
/// one typed value for handlers.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub db: DbSession,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts.extensions.get::<RequestId>().cloned().unwrap_or_default();
        let db = parts
            .extensions
            .get::<DbSession>()
            .cloned()
            .ok_or_else(|| {
                AppError::internal("database session middleware is not installed")
                    .with_code(ErrorCode::DatabaseUnavailable)
            })?;

        Ok(Self { request_id, db })
    }
}
