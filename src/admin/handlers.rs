use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::context::Context;
use crate::db::Connector;
use crate::health::ConnectionState;
use crate::manager::ConnectionMetrics;
use crate::network::NetworkState;
use crate::resilience::{CircuitSnapshot, CircuitState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub state: ConnectionState,
    pub stopped: bool,
    pub circuit: CircuitSnapshot,
    pub network: NetworkState,
}

#[derive(Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub state: ConnectionState,
}

#[derive(Serialize)]
pub struct CircuitResetResult {
    pub circuit: CircuitState,
}

pub async fn get_status<C: Connector>(State(state): State<AdminState<C>>) -> Json<SystemStatus> {
    let manager = &state.manager;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        state: manager.state(),
        stopped: manager.is_stopped(),
        circuit: manager.circuit_breaker().snapshot(),
        network: manager.network_state(),
    })
}

pub async fn get_metrics<C: Connector>(State(state): State<AdminState<C>>) -> Json<ConnectionMetrics> {
    Json(state.manager.metrics())
}

pub async fn post_health_check<C: Connector>(State(state): State<AdminState<C>>) -> Json<HealthCheckResult> {
    let timeout = state.manager.policy().health_check.timeout();
    let ctx = Context::background().with_timeout(timeout);
    let healthy = state.manager.force_health_check(&ctx).await;

    Json(HealthCheckResult {
        healthy,
        state: state.manager.state(),
    })
}

pub async fn post_circuit_reset<C: Connector>(State(state): State<AdminState<C>>) -> Json<CircuitResetResult> {
    state.manager.reset_circuit_breaker();
    Json(CircuitResetResult {
        circuit: state.manager.circuit_state(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::admin::setup_admin_router;
    use crate::config::ResiliencePolicy;
    use crate::db::SqlxConnector;
    use crate::manager::ConnectionManager;
    use crate::network::NetworkMonitor;

    fn manager() -> ConnectionManager<SqlxConnector> {
        let mut policy = ResiliencePolicy::default();
        policy.database.max_connections = 1;
        let connector = SqlxConnector::new(&policy.database).unwrap();
        let network = Arc::new(NetworkMonitor::new(policy.network.clone()));
        ConnectionManager::new(policy, connector, network).unwrap()
    }

    fn request(method: &str, uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_key() {
        let router = setup_admin_router(manager(), "secret");

        let missing = router.clone().oneshot(request("GET", "/admin/status", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router.oneshot(request("GET", "/admin/status", Some("nope"))).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_and_health_check() {
        let manager = manager();
        let router = setup_admin_router(manager.clone(), "secret");

        let status = router
            .clone()
            .oneshot(request("GET", "/admin/status", Some("secret")))
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        let body = json(status).await;
        assert_eq!(body["state"], "unknown");
        assert_eq!(body["circuit"]["state"], "closed");

        let check = router
            .clone()
            .oneshot(request("POST", "/admin/health-check", Some("secret")))
            .await
            .unwrap();
        let body = json(check).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["state"], "connected");

        let metrics = router
            .oneshot(request("GET", "/admin/metrics", Some("secret")))
            .await
            .unwrap();
        let body = json(metrics).await;
        assert_eq!(body["health_checks"], 1);
        assert_eq!(body["successful_connections"], 1);
    }

    #[tokio::test]
    async fn test_circuit_reset() {
        let manager = manager();
        for _ in 0..5 {
            manager
                .circuit_breaker()
                .record_failure(&crate::error::Error::Connection("refused".into()));
        }
        assert_eq!(manager.circuit_state(), crate::resilience::CircuitState::Open);

        let router = setup_admin_router(manager.clone(), "secret");
        let response = router
            .oneshot(request("POST", "/admin/circuit/reset", Some("secret")))
            .await
            .unwrap();
        assert_eq!(json(response).await["circuit"], "closed");
    }
}
