//! HTTP server implementation.

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::middleware::admission_middleware;
use crate::error::{Result, TurnstileError};
use crate::gate::AdmissionGate;
use crate::ratelimit::Janitor;

/// Health check payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
    pub timestamp: String,
}

/// Build information reported by the health check.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Clone)]
struct HealthState {
    environment: String,
}

async fn healthcheck(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.environment,
            version: env!("CARGO_PKG_VERSION"),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Wrap every route of `router` with the admission gate.
pub fn with_admission(router: Router, gate: Arc<AdmissionGate>) -> Router {
    router.layer(middleware::from_fn_with_state(gate, admission_middleware))
}

/// Build the service router.
pub fn router(gate: Arc<AdmissionGate>, environment: &str) -> Router {
    let routes = Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .with_state(HealthState {
            environment: environment.to_string(),
        });

    with_admission(routes, gate)
}

/// HTTP server fronted by the admission gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Deployment environment reported by the health check
    environment: String,
    /// The admission gate
    gate: Arc<AdmissionGate>,
    /// Sweeper for the gate's registry
    janitor: Janitor,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(
        addr: SocketAddr,
        environment: impl Into<String>,
        gate: Arc<AdmissionGate>,
        janitor: Janitor,
    ) -> Self {
        Self {
            addr,
            environment: environment.into(),
            gate,
            janitor,
        }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server and the janitor both stop when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        let janitor = self.janitor.spawn(CancellationToken::new());

        info!(
            addr = %local_addr,
            environment = %self.environment,
            "Starting HTTP server"
        );

        let app = router(self.gate, &self.environment);
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await;

        janitor.shutdown().await;

        result.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Server(e.to_string())
        })
    }
}
