//! Prometheus federation proxy
//!
//! Single-binary Rust service that:
//! 1. Accepts federation requests naming a remote OpenShift cluster
//! 2. Obtains a bearer token for that cluster via its OAuth redirect login
//!    flow, caching it until shortly before expiry
//! 3. Forwards the remaining query to the cluster's `/federate` endpoint
//!    with the token attached and all credential parameters stripped

mod config;
mod error;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use cluster_auth::{CredentialStore, login};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::proxy::ProxyState;

/// How long in-flight requests get to finish once a shutdown signal arrives.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    started_at: std::time::Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit layer bounds simultaneous requests to
/// `max_connections`; excess requests queue until a slot frees up.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/federate", get(federate_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting federation-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        auth_url_template = %config.upstream.auth_url_template,
        metrics_url_template = %config.upstream.metrics_url_template,
        timeout_secs = config.upstream.timeout_secs,
        "configuration loaded"
    );

    let timeout = Duration::from_secs(config.upstream.timeout_secs);
    let auth_client =
        login::build_auth_client(timeout).context("failed to build authorization client")?;
    let metrics_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build federation client")?;

    let app_state = AppState {
        proxy: ProxyState {
            auth_client,
            metrics_client,
            store: Arc::new(CredentialStore::new()),
            upstream: config.upstream.clone(),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        },
        started_at: std::time::Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    // Graceful shutdown:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a slow client cannot block exit;
    //    the timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

async fn federate_handler(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::handle_federate(&state.proxy, query, request_id).await
}

/// Health endpoint: JSON with status, uptime, request counters, and the
/// number of cached credentials. 200 whenever the process is up.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let requests = state.proxy.requests_total.load(Ordering::Relaxed);
    let errors = state.proxy.errors_total.load(Ordering::Relaxed);
    let cached = state.proxy.store.len().await;

    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
        "cached_credentials": cached,
    });
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn not_found_handler(request: axum::http::Request<axum::body::Body>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        &format!("no route for {}", request.uri().path()),
        &request_id,
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    /// Create a PrometheusHandle for tests without installing a global
    /// recorder. Using build_recorder() avoids the "recorder already
    /// installed" panic when multiple tests run in the same process.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_app_state(upstream: config::UpstreamConfig) -> AppState {
        AppState {
            proxy: ProxyState {
                auth_client: login::build_auth_client(Duration::from_secs(2))
                    .expect("auth client"),
                metrics_client: reqwest::Client::builder()
                    .timeout(Duration::from_secs(2))
                    .build()
                    .expect("metrics client"),
                store: Arc::new(CredentialStore::new()),
                upstream,
                requests_total: Arc::new(AtomicU64::new(0)),
                errors_total: Arc::new(AtomicU64::new(0)),
            },
            started_at: std::time::Instant::now(),
            prometheus: test_prometheus_handle(),
        }
    }

    /// Upstream config pointing nowhere, for tests that never leave the router.
    fn unused_upstream() -> config::UpstreamConfig {
        config::UpstreamConfig {
            auth_url_template: "http://127.0.0.1:1/authorize".into(),
            metrics_url_template: "http://127.0.0.1:1/federate".into(),
            timeout_secs: 2,
        }
    }

    /// Start a mock federation endpoint serving a fixed body.
    async fn start_federate_server(body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let app = Router::new().route(
                "/federate",
                get(move || async move {
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                        body,
                    )
                }),
            );
            axum::serve(listener, app).await.expect("serve");
        });
        addr
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let state = test_app_state(unused_upstream());
        state
            .proxy
            .requests_total
            .fetch_add(5, Ordering::Relaxed);

        let app = build_router(state, 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["requests_served"], 5);
        assert_eq!(json["errors_total"], 0);
        assert_eq!(json["cached_credentials"], 0);
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let state = test_app_state(unused_upstream());
        let app = build_router(state, 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .expect("content type");
        assert!(
            content_type.contains("text/plain"),
            "metrics endpoint must return text exposition format"
        );
    }

    #[tokio::test]
    async fn unknown_route_returns_json_404() {
        let state = test_app_state(unused_upstream());
        let app = build_router(state, 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
        let request_id = json["error"]["request_id"].as_str().expect("request id");
        assert!(request_id.starts_with("req_"));
    }

    #[tokio::test]
    async fn federate_without_credentials_is_rejected() {
        let state = test_app_state(unused_upstream());
        let app = build_router(state, 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/federate?endpoint=c1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "bad_request");
        let request_id = json["error"]["request_id"].as_str().expect("request id");
        assert!(
            request_id.starts_with("req_"),
            "request_id must carry the req_ prefix, got: {request_id}"
        );
    }

    #[tokio::test]
    async fn federate_end_to_end_with_explicit_token() {
        let upstream_addr = start_federate_server("up 1\n").await;
        let state = test_app_state(config::UpstreamConfig {
            auth_url_template: "http://127.0.0.1:1/authorize".into(),
            metrics_url_template: format!("http://{upstream_addr}/federate"),
            timeout_secs: 2,
        });
        let app = build_router(state, 16);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/federate?endpoint=c1&token=tok")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        assert_eq!(&bytes[..], b"up 1\n");
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_federation_counters_after_request() {
        // metrics macros record to the global recorder, so this test installs
        // one. Use a OnceLock guard since only one global recorder can exist
        // per process; other tests use isolated handles.
        use std::sync::OnceLock;
        static GLOBAL_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
        let handle = GLOBAL_HANDLE
            .get_or_init(crate::metrics::install_recorder)
            .clone();

        let upstream_addr = start_federate_server("up 1\n").await;
        let mut state = test_app_state(config::UpstreamConfig {
            auth_url_template: "http://127.0.0.1:1/authorize".into(),
            metrics_url_template: format!("http://{upstream_addr}/federate"),
            timeout_secs: 2,
        });
        state.prometheus = handle;

        let app = build_router(state.clone(), 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/federate?endpoint=c1&token=tok")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");
        assert_eq!(response.status(), StatusCode::OK);

        let metrics_app = build_router(state, 16);
        let metrics_response = metrics_app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("oneshot");
        let bytes = axum::body::to_bytes(metrics_response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        let rendered = String::from_utf8(bytes.to_vec()).expect("utf8");

        assert!(
            rendered.contains("federation_requests_total"),
            "/metrics must report federation_requests_total after a request.\nRendered:\n{rendered}"
        );
        assert!(
            rendered.contains("federation_request_duration_seconds"),
            "/metrics must report request durations.\nRendered:\n{rendered}"
        );
    }

    #[tokio::test]
    async fn concurrency_limit_queues_excess_requests() {
        // Tower's ConcurrencyLimitLayer queues (not rejects) excess requests:
        // with max_connections=1 the second request waits for the first slot
        // and both eventually succeed.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let upstream_addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let app = Router::new().route(
                "/federate",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    "slow\n"
                }),
            );
            axum::serve(listener, app).await.expect("serve");
        });

        let state = test_app_state(config::UpstreamConfig {
            auth_url_template: "http://127.0.0.1:1/authorize".into(),
            metrics_url_template: format!("http://{upstream_addr}/federate"),
            timeout_secs: 5,
        });
        let app = build_router(state, 1);

        let test_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let test_addr = test_listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(test_listener, app).await.expect("serve");
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("client");
        let url = format!("http://{test_addr}/federate?endpoint=c1&token=tok");

        let (first, second) = tokio::join!(client.get(&url).send(), client.get(&url).send());
        let first = first.expect("first request").status();
        let second = second.expect("second request").status();
        assert!(
            first.is_success() && second.is_success(),
            "queued requests must still complete, got {first} and {second}"
        );
    }
}
