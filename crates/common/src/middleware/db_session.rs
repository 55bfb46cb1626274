use crate::AppState;
use crate::context::DbSession;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Makes the shared database reachable from the request. The pool itself is
/// only opened by the connector's one-time initializer.
pub async fn db_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    request
        .extensions_mut()
        .insert(DbSession::new(state.db.clone()));
    next.run(request).await
}
