//! Probe and metrics endpoints
//!
//! `/healthz` answers as soon as the process is up; `/readyz` only once the
//! watchers are running. `/metrics` serves the Prometheus text format.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Readiness flag flipped once the controllers are running
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// Mark the process ready
    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the process is ready
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parse `:9440`-style bind addresses, defaulting the host to all interfaces
pub fn parse_bind_address(raw: &str) -> Result<SocketAddr, ControllerError> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    candidate
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("invalid bind address {raw}: {e}")))
}

async fn readyz(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Liveness and readiness routes
pub fn health_routes(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
        .layer(TraceLayer::new_for_http())
}

/// Prometheus route
pub fn metrics_routes(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve `router` until `shutdown` fires
pub async fn serve(name: &'static str, addr: SocketAddr, router: Router, shutdown: CancellationToken) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {} server to {}: {}", name, addr, e);
            return;
        }
    };
    info!("Serving {} on {}", name, addr);
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        error!("{} server failed: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_readyz_follows_readiness() {
        let readiness = Readiness::default();
        let (status, _) = get_path(health_routes(readiness.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        readiness.set_ready();
        let (status, body) = get_path(health_routes(readiness), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_healthz_is_always_ok() {
        let (status, _) = get_path(health_routes(Readiness::default()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposes_registry() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_create_failure("openshift-machine-api", "InvalidConfiguration");

        let (status, body) = get_path(metrics_routes(metrics), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(
            r#"mapi_machine_create_failed_total{namespace="openshift-machine-api",reason="InvalidConfiguration"} 1"#
        ));
    }

    #[test]
    fn test_parse_bind_address() {
        assert_eq!(parse_bind_address(":9440").unwrap(), "0.0.0.0:9440".parse::<SocketAddr>().unwrap());
        assert_eq!(parse_bind_address("127.0.0.1:8081").unwrap(), "127.0.0.1:8081".parse::<SocketAddr>().unwrap());
        assert!(parse_bind_address("nope").is_err());
    }
}
