use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tracing::Instrument;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Races the rest of the chain against `deadline`.
///
/// The downstream work runs as its own task. When the deadline wins the client
/// gets a 408 and the task is detached: it keeps running to completion and its
/// response is dropped. Handlers that must stop early have to watch for that
/// themselves.
pub async fn timeout(State(deadline): State<Duration>, request: Request, next: Next) -> Response {
    let handler = tokio::spawn(next.run(request).in_current_span());

    tokio::select! {
        joined = handler => match joined {
            Ok(response) => response,
            Err(e) => AppError::internal(format!("request handler failed: {e}")).into_response(),
        },
        _ = tokio::time::sleep(deadline) => {
            tracing::warn!(
                timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "Request timed out, abandoning handler"
            );
            AppError::http(StatusCode::REQUEST_TIMEOUT, "Request Timeout").into_response()
        }
    }
}
