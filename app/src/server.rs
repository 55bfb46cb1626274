use axum::{Router, middleware};
use common::AppState;
use common::middleware::{
    REQUEST_TIMEOUT, cors, db_session, error_handler, not_found, request_id, request_logger,
    timeout,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tower::ServiceBuilder;

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Failed to listen and serve: {0}")]
    Serve(std::io::Error),
    #[error("Server task failed: {0}")]
    Join(#[from] JoinError),
    #[error("Graceful shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

pub fn build_router(state: Arc<AppState>, options: &ServerOptions) -> Router {
    let api = Router::<Arc<AppState>>::new()
        .nest("/v1/api", health::handler::health_router(state.clone()))
        .fallback(not_found);

    with_middleware(api, state, options)
}

/// Installs the fixed middleware chain. Outermost first: error handler,
/// request id, request logger, db session, CORS, timeout.
pub fn with_middleware(
    router: Router<Arc<AppState>>,
    state: Arc<AppState>,
    options: &ServerOptions,
) -> Router {
    router
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(error_handler))
                .layer(middleware::from_fn(request_id))
                .layer(middleware::from_fn_with_state(state.clone(), request_logger))
                .layer(middleware::from_fn_with_state(state.clone(), db_session))
                .layer(cors())
                .layer(middleware::from_fn_with_state(options.request_timeout, timeout)),
        )
        .with_state(state)
}

/// Binds `0.0.0.0:PORT` and serves until SIGINT/SIGTERM.
pub async fn run(state: Arc<AppState>, options: ServerOptions) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!("Server is running on {}", addr);

    let app = build_router(state, &options);
    serve(listener, app, shutdown_signal(), options.shutdown_timeout).await
}

/// Serves `app` in a background task until `shutdown` resolves, then stops
/// accepting connections and gives in-flight ones `shutdown_timeout` to finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
    shutdown_timeout: Duration,
) -> Result<(), ServerError> {
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .await
    });

    tokio::select! {
        _ = shutdown => {}
        finished = &mut server => {
            // Listener died before any signal arrived.
            let result = finished?;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Failed to listen and serve");
            }
            return result.map_err(ServerError::Serve);
        }
    }

    common::notice!("graceful shutdown");
    let _ = stop_tx.send(());

    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("Server stopped");
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "failed to shutdown server");
            Err(ServerError::Serve(e))
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to shutdown server");
            Err(ServerError::Join(e))
        }
        Err(_) => {
            tracing::error!(?shutdown_timeout, "failed to shutdown server: deadline exceeded");
            Err(ServerError::ShutdownTimeout(shutdown_timeout))
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
        routing::get,
    };
    use common::context::REQUEST_ID_HEADER;
    use common::{ErrorBody, get_test_state};
    use database::{DbConnector, get_test_connector, get_unreachable_connector};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    fn app(db: DbConnector) -> Router {
        build_router(get_test_state(db), &ServerOptions::default())
    }

    async fn send(app: Router, request: Request<Body>) -> Response {
        app.oneshot(request).await.unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request_id_of(response: &Response) -> String {
        response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string()
    }

    #[test]
    fn test_default_server_options() {
        let options = ServerOptions::default();
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(SHUTDOWN_TIMEOUT, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_health_without_database() {
        let connector = DbConnector::new(None, Default::default(), Default::default());
        let response = send(app(connector), get_request("/v1/api/health")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(uuid::Uuid::parse_str(&request_id_of(&response)).is_ok());
        assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_inbound_request_id_is_echoed() {
        let request = Request::builder()
            .uri("/v1/api/health")
            .header(REQUEST_ID_HEADER, "abc")
            .body(Body::empty())
            .unwrap();
        let response = send(app(get_test_connector()), request).await;

        assert_eq!(request_id_of(&response), "abc");
    }

    #[tokio::test]
    async fn test_db_health_connected() {
        let response = send(app(get_test_connector()), get_request("/v1/api/health/db")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "db_status": "connected" })
        );
    }

    #[tokio::test]
    async fn test_db_health_unreachable() {
        let response =
            send(app(get_unreachable_connector()), get_request("/v1/api/health/db")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!request_id_of(&response).is_empty());

        let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.code, "DATABASE_UNAVAILABLE");
        assert_eq!(body.error, "Internal Server Error");
    }

    #[tokio::test]
    async fn test_concurrent_db_checks_open_one_pool() {
        let state = get_test_state(get_test_connector());
        let router = build_router(state.clone(), &ServerOptions::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move { send(router, get_request("/v1/api/health/db")).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().status(), StatusCode::OK);
        }
        assert_eq!(state.db.open_attempts(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = send(app(get_test_connector()), get_request("/v1/api/nope")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!request_id_of(&response).is_empty());
        let body = body_json(response).await;
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["error"], "Not Found");
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/api/health")
            .body(Body::empty())
            .unwrap();
        let response = send(app(get_test_connector()), request).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(response).await["code"], "METHOD_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn test_head_error_is_bodyless() {
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/v1/api/health/db")
            .body(Body::empty())
            .unwrap();
        let response = send(app(get_unreachable_connector()), request).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/api/health")
            .header("origin", "https://app.example.com")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = send(app(get_test_connector()), request).await;

        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers["access-control-max-age"], "3600");
        assert!(headers.contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_slow_handler_gets_408() {
        let options = ServerOptions {
            request_timeout: Duration::from_millis(100),
            ..ServerOptions::default()
        };
        let router = Router::<Arc<AppState>>::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let app = with_middleware(router, get_test_state(get_test_connector()), &options);

        let start = Instant::now();
        let response = send(app, get_request("/slow")).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(!request_id_of(&response).is_empty());
        assert_eq!(body_json(response).await["code"], "REQUEST_TIMEOUT");
    }

    async fn raw_get(stream: &mut TcpStream, path: &str) -> String {
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn slow_app(delay: Duration) -> Router {
        Router::new().route(
            "/slow",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "done"
            }),
        )
    }

    #[tokio::test]
    async fn test_graceful_shutdown_finishes_in_flight_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            slow_app(Duration::from_millis(300)),
            async move {
                let _ = stop_rx.await;
            },
            Duration::from_secs(5),
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let in_flight = tokio::spawn(async move { raw_get(&mut stream, "/slow").await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("done"));

        server.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            slow_app(Duration::from_secs(10)),
            async move {
                let _ = stop_rx.await;
            },
            Duration::from_millis(100),
        ));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _in_flight = tokio::spawn(async move { raw_get(&mut stream, "/slow").await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();

        let result = server.await.unwrap();
        assert!(matches!(result, Err(ServerError::ShutdownTimeout(_))));
    }
}
