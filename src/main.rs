//! dbguard daemon.
//!
//! Keeps a resilient connection to one database, logs every state change,
//! and serves the admin API.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │                     ConnectionManager                    │
//!  │                                                          │
//!  │  caller ─▶ BackoffRetrier ─▶ CircuitBreaker ─▶ sqlx pool │
//!  │                                                          │
//!  │  HealthMonitor tick ──┐                                  │
//!  │  NetworkMonitor event ┴─▶ StateTracker ─▶ subscribers    │
//!  └──────────────────────────────────────────────────────────┘
//!        ▲                                   │
//!   admin API (axum)                 logs / Prometheus
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use dbguard::config::loader::{load_policy, ConfigError};
use dbguard::config::validation::validate_policy;
use dbguard::{admin, lifecycle, observability, ConnectionManager, Context, ResiliencePolicy};

const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "dbguard")]
#[command(about = "Resilient database connection daemon", long_about = None)]
struct Args {
    /// Path to the TOML resilience policy.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL; overrides `database.url` from the policy.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

fn load(args: &Args) -> Result<ResiliencePolicy, ConfigError> {
    let mut policy = match &args.config {
        Some(path) => load_policy(path)?,
        None => ResiliencePolicy::default(),
    };
    if let Some(url) = &args.database_url {
        policy.database.url = url.clone();
    }
    validate_policy(&policy).map_err(ConfigError::Validation)?;
    Ok(policy)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let policy = load(&args)?;

    observability::logging::init_tracing(&policy.observability)?;
    tracing::info!("dbguard v{} starting", env!("CARGO_PKG_VERSION"));

    if policy.observability.metrics_enabled {
        match policy.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %policy.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let manager = ConnectionManager::from_policy(policy.clone())?;
    let shutdown = CancellationToken::new();
    tokio::spawn(lifecycle::shutdown_signal(shutdown.clone()));
    spawn_event_logger(&manager, shutdown.clone());

    let ctx = Context::from_token(shutdown.child_token());
    manager.start(&ctx).await?;

    let admin_task = if policy.admin.enabled {
        let listener = TcpListener::bind(&policy.admin.bind_address).await?;
        let router = admin::setup_admin_router(manager.clone(), &policy.admin.api_key);
        Some(tokio::spawn(admin::serve(listener, router, shutdown.clone())))
    } else {
        None
    };

    shutdown.cancelled().await;

    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
            Ok(Ok(())) => {}
        }
    }

    let stop_ctx = Context::background().with_timeout(STOP_TIMEOUT);
    if let Err(e) = manager.stop(&stop_ctx).await {
        tracing::warn!(error = %e, "Connection manager did not stop cleanly");
    }

    let metrics = manager.metrics();
    tracing::info!(
        total_attempts = metrics.total_attempts,
        successful = metrics.successful_connections,
        failed = metrics.failed_connections,
        circuit_trips = metrics.circuit_trips,
        "Shutdown complete"
    );
    Ok(())
}

/// Log circuit and network events; connection state changes log themselves.
fn spawn_event_logger<C: dbguard::db::Connector>(manager: &ConnectionManager<C>, shutdown: CancellationToken) {
    let mut circuit = manager.subscribe_circuit();
    let mut network = manager.subscribe_network();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(change) = circuit.recv() => {
                    tracing::info!(
                        previous = %change.previous,
                        current = %change.current,
                        failure_count = change.failure_count,
                        last_error = change.last_error.as_deref().unwrap_or("none"),
                        "Circuit event"
                    );
                }
                Ok(change) = network.recv() => {
                    tracing::info!(
                        previous = %change.previous,
                        current = %change.current,
                        available = change.is_available,
                        "Network event"
                    );
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
