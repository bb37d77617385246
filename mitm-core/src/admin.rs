use crate::error::MitmError;
use crate::rules::{DelayEntry, OverrideEntry, RuleSet, StatusEntry};
use crate::store::RuleStore;
use crate::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::info;

/// Shared state for metrics
#[derive(Debug, Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub blocked_requests: AtomicU64,
    pub overridden_responses: AtomicU64,
    pub status_overrides: AtomicU64,
    pub delayed_responses: AtomicU64,
    pub mutation_failures: AtomicU64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            overridden_responses: self.overridden_responses.load(Ordering::Relaxed),
            status_overrides: self.status_overrides.load(Ordering::Relaxed),
            delayed_responses: self.delayed_responses.load(Ordering::Relaxed),
            mutation_failures: self.mutation_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub overridden_responses: u64,
    pub status_overrides: u64,
    pub delayed_responses: u64,
    pub mutation_failures: u64,
}

/// Everything the admin API needs to serve requests
#[derive(Debug, Clone)]
pub struct AdminState {
    pub store: Arc<dyn RuleStore>,
    pub metrics: Arc<Metrics>,
    /// Root CA served at `/ca.pem` so clients can trust the proxy
    pub ca_cert_pem: Option<Arc<str>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct BlockRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DelayRequest {
    alias: String,
    url: String,
    delay: String,
}

impl IntoResponse for MitmError {
    fn into_response(self) -> Response {
        let status = match &self {
            MitmError::NotFound { .. } => StatusCode::NOT_FOUND,
            MitmError::InvalidDuration(_) | MitmError::Json(_) => StatusCode::BAD_REQUEST,
            MitmError::MutationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Routes of the admin API
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ca.pem", get(ca_cert_handler))
        .route("/rules", get(list_rules).delete(clear_rules))
        .route("/rules/blocks", post(add_block).delete(remove_block))
        .route("/rules/overrides", post(add_override))
        .route("/rules/overrides/:alias", delete(remove_override))
        .route("/rules/status", post(add_status_override))
        .route("/rules/status/:alias", delete(remove_status_override))
        .route("/rules/delays", post(add_delay))
        .with_state(state)
}

/// Bind the admin API listener; port 0 picks a free port.
pub async fn bind_admin(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| MitmError::Network(format!("Failed to bind admin address {}: {}", addr, e)))
}

pub async fn serve_admin<F>(listener: TcpListener, state: AdminState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Starting Admin API on {}", addr);
    }

    axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| MitmError::Network(format!("Admin server failed: {}", e)))?;

    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn metrics_handler(State(state): State<AdminState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn ca_cert_handler(State(state): State<AdminState>) -> Response {
    match &state.ca_cert_pem {
        Some(pem) => (
            [(header::CONTENT_TYPE, "application/x-pem-file")],
            pem.to_string(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_rules(State(state): State<AdminState>) -> Json<RuleSet> {
    Json(RuleSet::clone(&state.store.snapshot()))
}

async fn clear_rules(State(state): State<AdminState>) -> StatusCode {
    state.store.clear_all();
    StatusCode::NO_CONTENT
}

async fn add_block(
    State(state): State<AdminState>,
    Json(req): Json<BlockRequest>,
) -> StatusCode {
    state.store.add_block(&req.url);
    StatusCode::CREATED
}

async fn remove_block(
    State(state): State<AdminState>,
    Query(req): Query<BlockRequest>,
) -> Result<StatusCode> {
    state.store.remove_block(&req.url)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_override(
    State(state): State<AdminState>,
    Json(entry): Json<OverrideEntry>,
) -> StatusCode {
    state.store.add_override(entry);
    StatusCode::CREATED
}

async fn remove_override(
    State(state): State<AdminState>,
    Path(alias): Path<String>,
) -> Result<Json<OverrideEntry>> {
    Ok(Json(state.store.remove_override(&alias)?))
}

async fn add_status_override(
    State(state): State<AdminState>,
    Json(entry): Json<StatusEntry>,
) -> StatusCode {
    state.store.add_status_override(entry);
    StatusCode::CREATED
}

async fn remove_status_override(
    State(state): State<AdminState>,
    Path(alias): Path<String>,
) -> Result<Json<StatusEntry>> {
    Ok(Json(state.store.remove_status_override(&alias)?))
}

async fn add_delay(
    State(state): State<AdminState>,
    Json(req): Json<DelayRequest>,
) -> Result<StatusCode> {
    let entry = DelayEntry::new(req.alias, req.url, &req.delay)?;
    state.store.add_delay(entry);
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRuleStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AdminState {
        AdminState {
            store: Arc::new(InMemoryRuleStore::new()),
            metrics: Arc::new(Metrics::default()),
            ca_cert_pem: None,
        }
    }

    async fn send(
        state: &AdminState,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = admin_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&state(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn test_block_lifecycle() {
        let state = state();
        let (status, _) = send(
            &state,
            "POST",
            "/rules/blocks",
            Some(serde_json::json!({"url": "blocked.example"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(state.store.snapshot().block_list, vec!["blocked.example"]);

        let (status, _) = send(&state, "DELETE", "/rules/blocks?url=blocked.example", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) =
            send(&state, "DELETE", "/rules/blocks?url=blocked.example", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8(body).unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_override_defaults_and_removal() {
        let state = state();
        let (status, _) = send(
            &state,
            "POST",
            "/rules/overrides",
            Some(serde_json::json!({"alias": "A1", "url": "api.example/v1", "body": "OK"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(state.store.snapshot().custom_responses[0].status_code, 200);

        let (status, body) = send(&state, "DELETE", "/rules/overrides/A1", None).await;
        assert_eq!(status, StatusCode::OK);
        let removed: OverrideEntry = serde_json::from_slice(&body).unwrap();
        assert_eq!(removed.body.as_deref(), Some("OK"));

        let (status, _) = send(&state, "DELETE", "/rules/overrides/A1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_and_delay_rules() {
        let state = state();
        send(
            &state,
            "POST",
            "/rules/status",
            Some(serde_json::json!({"alias": "S1", "url": "api.example", "status_code": 503})),
        )
        .await;
        let (status, _) = send(
            &state,
            "POST",
            "/rules/delays",
            Some(serde_json::json!({"alias": "D1", "url": "slow.example", "delay": "500ms"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &state,
            "POST",
            "/rules/delays",
            Some(serde_json::json!({"alias": "D2", "url": "slow.example", "delay": "later"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).unwrap().contains("invalid time string"));

        let (_, body) = send(&state, "GET", "/rules", None).await;
        let rules: RuleSet = serde_json::from_slice(&body).unwrap();
        assert_eq!(rules.custom_statuses[0].status_code, 503);
        assert_eq!(rules.response_delays.len(), 1);

        let (status, _) = send(&state, "DELETE", "/rules/status/S1", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_clear_all_rules() {
        let state = state();
        state.store.add_block("a.example");
        state.store.add_status_override(StatusEntry::new("S1", "a.example", 500));

        let (status, _) = send(&state, "DELETE", "/rules", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_and_ca() {
        let mut state = state();
        state.metrics.blocked_requests.fetch_add(2, Ordering::Relaxed);

        let (_, body) = send(&state, "GET", "/metrics", None).await;
        let metrics: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(metrics.blocked_requests, 2);

        let (status, _) = send(&state, "GET", "/ca.pem", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.ca_cert_pem = Some(Arc::from("-----BEGIN CERTIFICATE-----"));
        let (status, body) = send(&state, "GET", "/ca.pem", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().starts_with("-----BEGIN"));
    }
}
