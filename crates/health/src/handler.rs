use crate::models::{DbHealthStatus, HealthStatus};
use crate::service::{HealthError, HealthService};
use axum::{Json, Router, routing::get};
use common::{AppError, AppState, ErrorCode, RequestContext};
use database::RepositoryError;
use std::sync::Arc;

impl From<HealthError> for AppError {
    fn from(err: HealthError) -> Self {
        let code = match &err {
            HealthError::Unavailable(_) | HealthError::Query(RepositoryError::Unavailable(_)) => {
                ErrorCode::DatabaseUnavailable
            }
            HealthError::Query(RepositoryError::Infrastructure(_)) => ErrorCode::DatabaseError,
        };
        AppError::internal(err).with_code(code)
    }
}

pub fn health_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(db_health))
        .with_state(state)
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

async fn db_health(ctx: RequestContext) -> Result<Json<DbHealthStatus>, AppError> {
    HealthService::check_database(&ctx.db).await?;
    tracing::debug!("Database health check passed");
    Ok(Json(DbHealthStatus::connected()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
    };
    use common::{ErrorBody, get_test_state, middleware::db_session};
    use database::{DbConnector, get_test_connector, get_unreachable_connector};
    use tower::ServiceExt;

    fn app(db: DbConnector) -> Router {
        let state = get_test_state(db);
        health_router(state.clone())
            .layer(middleware::from_fn_with_state(state.clone(), db_session))
            .with_state(state)
    }

    async fn get_path(app: Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_health_ignores_database() {
        let (status, body) = get_path(app(get_unreachable_connector()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<HealthStatus>(&body).unwrap(), HealthStatus::ok());
    }

    #[tokio::test]
    async fn test_db_health_connected() {
        let (status, body) = get_path(app(get_test_connector()), "/health/db").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<DbHealthStatus>(&body).unwrap(),
            DbHealthStatus::connected()
        );
    }

    #[tokio::test]
    async fn test_db_health_unreachable() {
        let (status, body) = get_path(app(get_unreachable_connector()), "/health/db").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let error: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "DATABASE_UNAVAILABLE");
        assert!(!error.error.is_empty());
    }

    #[tokio::test]
    async fn test_db_health_without_database_url() {
        let connector = DbConnector::new(None, Default::default(), Default::default());
        let (status, body) = get_path(app(connector), "/health/db").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let error: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "DATABASE_UNAVAILABLE");
    }

    #[test]
    fn test_query_failure_maps_to_database_error() {
        let err = AppError::from(HealthError::Query(RepositoryError::Infrastructure(
            database::Error::RowNotFound,
        )));
        assert_eq!(err.code(), ErrorCode::DatabaseError);
        assert!(err.is_internal());
    }
}
