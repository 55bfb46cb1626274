use crate::error::{AppError, ErrorBody, ErrorCode, ErrorReport};
use crate::middleware::request_logger::RequestSpan;
use axum::{
    body::Body,
    extract::Request,
    http::{
        HeaderValue, Method, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Span;

/// Upper bound on how much of a framework error body is kept as `details`.
const DETAILS_LIMIT: usize = 8 * 1024;

/// The single place where failed requests are turned into the uniform error
/// body and where internal errors are logged.
pub async fn error_handler(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    let span = response
        .extensions()
        .get::<RequestSpan>()
        .map(|RequestSpan(span)| span.clone())
        .unwrap_or_else(Span::none);
    let report = response.extensions().get::<ErrorReport>().cloned();

    let response = match report {
        Some(report) => {
            if let Some(cause) = &report.internal {
                span.in_scope(|| {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        code = report.code.as_str(),
                        call_stack = %cause.backtrace,
                        "{}",
                        cause.message
                    )
                });
            }
            response
        }
        None => {
            let status = response.status();
            if status.is_server_error() {
                span.in_scope(|| {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        status = status.as_u16(),
                        code = ErrorCode::from_status(status).as_str(),
                        "Request failed without an error cause"
                    )
                });
            }
            if is_unformatted_error(&response) {
                normalize(response).await
            } else {
                response
            }
        }
    };

    if method == Method::HEAD {
        strip_body(response)
    } else {
        response
    }
}

fn is_unformatted_error(response: &Response) -> bool {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return false;
    }
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    !is_json
}

/// Rewrites a bare framework error (router 404/405, extractor rejections)
/// into the uniform body, keeping its status and headers.
async fn normalize(response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let status = parts.status;

    let details = match axum::body::to_bytes(body, DETAILS_LIMIT).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).trim().to_owned()),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read error response body");
            None
        }
    }
    .filter(|d| !d.is_empty());

    let error = ErrorBody {
        error: status.canonical_reason().unwrap_or("Unknown Error").to_owned(),
        code: ErrorCode::from_status(status).as_str().to_owned(),
        details,
    };
    let bytes = match serde_json::to_vec(&error) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to send error response");
            return AppError::http(status, error.error).into_response();
        }
    };

    parts
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    parts.headers.remove(CONTENT_LENGTH);
    parts.extensions.insert(ErrorReport {
        code: ErrorCode::from_status(status),
        internal: None,
    });
    Response::from_parts(parts, Body::from(bytes))
}

fn strip_body(response: Response) -> Response {
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::empty())
}

/// Fallback for unmatched routes.
pub async fn not_found() -> AppError {
    AppError::http(StatusCode::NOT_FOUND, "Not Found")
}
