use crate::context::{REQUEST_ID_HEADER, RequestId};
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};

/// Reuses a non-empty inbound `X-Request-ID` or generates a UUID, then
/// exposes it to the rest of the chain and to the client.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|v| RequestId::new(v))
        .unwrap_or_else(RequestId::generate);

    let header = HeaderValue::from_str(request_id.as_str()).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
