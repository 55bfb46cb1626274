use crate::context::REQUEST_ID_HEADER;
use axum::http::{
    HeaderName, Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Permissive policy shared by every route. Any origin is accepted; the
/// request's origin is mirrored back because credentials are allowed.
pub fn cors() -> CorsLayer {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT, AUTHORIZATION, request_id.clone()])
        .expose_headers([request_id])
        .allow_credentials(true)
        .max_age(PREFLIGHT_MAX_AGE)
}
