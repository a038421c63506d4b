use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use toolrelay_runtime::{RuntimeStatus, SessionState, StatusSnapshot};

#[derive(Clone)]
pub struct HealthState {
    status: Arc<RuntimeStatus>,
    worker_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker: String,
    pub session: StatusSnapshot,
    pub checked_at: String,
}

pub fn router(status: Arc<RuntimeStatus>, worker_name: impl Into<String>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthState { status, worker_name: worker_name.into() })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    status: Arc<RuntimeStatus>,
    worker_name: &str,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    let app = router(status, worker_name);
    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Ready only while a session is running; connecting, backoff and shutdown
/// report 503 so a load balancer stops routing to this worker.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let session = state.status.snapshot();
    let ready = session.state == SessionState::Running;

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        worker: state.worker_name.clone(),
        session,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
