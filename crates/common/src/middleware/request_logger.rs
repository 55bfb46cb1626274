use crate::AppState;
use crate::context::RequestId;
use crate::error::ErrorReport;
use crate::telemetry::{SPAN_ID_FIELD, TRACE_FIELD, TraceContext};
use axum::{
    body::HttpBody,
    extract::{ConnectInfo, Request, State},
    http::header::{CONTENT_LENGTH, USER_AGENT},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// The request span, handed back on the response so layers outside the
/// logger can still log with the request's correlation fields.
#[derive(Clone, Debug)]
pub struct RequestSpan(pub tracing::Span);

/// Opens the request span and logs the start and completion of every request.
/// Everything logged further down the chain inherits the span's request id
/// and trace identifiers.
pub async fn request_logger(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request.extensions().get::<RequestId>().cloned().unwrap_or_default();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        "logging.googleapis.com/trace" = tracing::field::Empty,
        "logging.googleapis.com/spanId" = tracing::field::Empty
    );
    if let Some(trace) = TraceContext::from_headers(request.headers()) {
        span.record(TRACE_FIELD, trace.cloud_trace(state.config.project_id()).as_str());
        span.record(SPAN_ID_FIELD, trace.span_id.as_str());
    }

    async move {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let start = Instant::now();

        tracing::info!(
            method = %method,
            path = %path,
            remote_addr = %client_addr(&request),
            user_agent = request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
            "Request started"
        );

        let mut response = next.run(request).await;

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms,
            bytes_out = bytes_out(&response),
            error_code = response.extensions().get::<ErrorReport>().map(|r| r.code.as_str()),
            "Request completed"
        );

        response
            .extensions_mut()
            .insert(RequestSpan(tracing::Span::current()));
        response
    }
    .instrument(span)
    .await
}

/// Best-effort client address: proxy headers first, then the socket peer.
pub fn client_addr(request: &Request) -> String {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "-".to_string())
}

fn bytes_out(response: &Response) -> u64 {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0)
}
