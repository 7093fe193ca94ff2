//! Operator HTTP surface.
//!
//! # Endpoints
//! - `GET /admin/status`: connection, circuit and network state
//! - `GET /admin/metrics`: `ConnectionMetrics` snapshot
//! - `POST /admin/health-check`: run a health check now
//! - `POST /admin/circuit/reset`: force the circuit closed
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::db::Connector;
use crate::manager::ConnectionManager;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Upper bound for any admin request, including a forced health check.
const ADMIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state for admin handlers.
pub struct AdminState<C: Connector> {
    pub manager: ConnectionManager<C>,
}

impl<C: Connector> Clone for AdminState<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

pub fn setup_admin_router<C: Connector>(manager: ConnectionManager<C>, api_key: &str) -> Router {
    let api_key: Arc<str> = Arc::from(api_key);

    Router::new()
        .route("/admin/status", get(get_status::<C>))
        .route("/admin/metrics", get(get_metrics::<C>))
        .route("/admin/health-check", post(post_health_check::<C>))
        .route("/admin/circuit/reset", post(post_circuit_reset::<C>))
        .layer(middleware::from_fn_with_state(api_key, admin_auth_middleware))
        .layer(TimeoutLayer::new(ADMIN_REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(AdminState { manager })
}

/// Serve the admin router until `shutdown` fires.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
