//! Health endpoints for K8s liveness and readiness checks.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use nsq_worker::WorkerState;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// State of one subscription as reported by the health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub topic: String,
    pub channel: String,
    pub state: String,
    #[serde(skip)]
    worker_state: WorkerState,
}

impl SubscriptionStatus {
    pub fn new(topic: &str, channel: &str, state: WorkerState) -> Self {
        Self {
            topic: topic.to_string(),
            channel: channel.to_string(),
            state: state.to_string(),
            worker_state: state,
        }
    }
}

/// Body of /health and /ready.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub subscriptions: Vec<SubscriptionStatus>,
}

type StatusSource = dyn Fn() -> Vec<SubscriptionStatus> + Send + Sync;

/// Reads worker states on every request.
#[derive(Clone)]
pub struct HealthState {
    statuses: Arc<StatusSource>,
}

impl HealthState {
    pub fn new(statuses: impl Fn() -> Vec<SubscriptionStatus> + Send + Sync + 'static) -> Self {
        Self {
            statuses: Arc::new(statuses),
        }
    }

    /// Alive while no worker has stopped.
    ///
    /// A worker that keeps failing to reach lookupd is still consuming; only a
    /// worker that gave up should trigger a restart.
    pub fn is_alive(&self) -> bool {
        (self.statuses)()
            .iter()
            .all(|sub| sub.worker_state != WorkerState::Stopped)
    }

    /// Ready once every worker is consuming.
    pub fn is_ready(&self) -> bool {
        (self.statuses)()
            .iter()
            .all(|sub| sub.worker_state == WorkerState::Consuming)
    }

    pub fn status(&self) -> HealthStatus {
        let subscriptions = (self.statuses)();
        let status = if subscriptions
            .iter()
            .all(|sub| sub.worker_state == WorkerState::Consuming)
        {
            "healthy"
        } else {
            "degraded"
        };
        HealthStatus {
            status,
            subscriptions,
        }
    }
}

/// Health server for K8s liveness and readiness checks.
pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16, state: HealthState) -> Self {
        Self {
            port,
            state,
            metrics_handle: None,
        }
    }

    /// Set the metrics handle for /metrics endpoint.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .with_state(self.state.clone());

        if let Some(handle) = self.metrics_handle.clone() {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);

        info!(addr = %addr, "Starting health server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Liveness check handler.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let code = if state.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(state.status()))
}

/// Readiness check handler.
async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let code = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(state.status()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn server(state: Arc<Mutex<WorkerState>>) -> HealthServer {
        HealthServer::new(
            0,
            HealthState::new(move || {
                let current = *state.lock().unwrap();
                vec![SubscriptionStatus::new("orders", "billing", current)]
            }),
        )
    }

    async fn get_status(router: Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_created_worker_is_alive_but_not_ready() {
        let router = server(Arc::new(Mutex::new(WorkerState::Created))).router();

        let (code, body) = get_status(router.clone(), "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "degraded");

        let (code, _) = get_status(router, "/ready").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_consuming_worker_is_ready() {
        let router = server(Arc::new(Mutex::new(WorkerState::Consuming))).router();

        let (code, body) = get_status(router, "/readyz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["subscriptions"][0]["topic"], "orders");
        assert_eq!(body["subscriptions"][0]["state"], "consuming");
    }

    #[tokio::test]
    async fn test_stopped_worker_fails_liveness() {
        let state = Arc::new(Mutex::new(WorkerState::Consuming));
        let router = server(state.clone()).router();
        *state.lock().unwrap() = WorkerState::Stopped;

        let (code, body) = get_status(router, "/healthz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["subscriptions"][0]["state"], "stopped");
    }
}
