use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::handlers::{self, HandlerState, HistoryParams, StatusParams};
use crate::identity::{driver_from_headers, DriverIdentity};
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<HandlerState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc", post(rpc_handler))
        .route("/api/v1/compliance/status", get(status_handler))
        .route("/api/v1/compliance/start", post(start_handler))
        .route("/api/v1/compliance/stop", post(stop_handler))
        .route("/api/v1/compliance/history", get(history_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns once the listener is up.
pub async fn start(
    config: ServerConfig,
    state: Arc<HandlerState>,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "tacho server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not finish cleanly");
        }
        tracing::info!("tacho server stopped");
    }
}

async fn health_handler(State(state): State<Arc<HandlerState>>) -> impl IntoResponse {
    let (healthy, body) = handlers::health(&state);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn status_handler(
    State(state): State<Arc<HandlerState>>,
    DriverIdentity(driver): DriverIdentity,
    query: Result<Query<StatusParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::InvalidParams(e.body_text()))?;
    let snapshot = handlers::status(&state, &driver, &params).await?;
    Ok(Json(snapshot))
}

async fn start_handler(
    State(state): State<Arc<HandlerState>>,
    DriverIdentity(driver): DriverIdentity,
) -> Result<impl IntoResponse, ApiError> {
    let envelope = handlers::start(&state, &driver)?;
    Ok((StatusCode::CREATED, Json(envelope)))
}

async fn stop_handler(
    State(state): State<Arc<HandlerState>>,
    DriverIdentity(driver): DriverIdentity,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(handlers::stop(&state, &driver)?))
}

async fn history_handler(
    State(state): State<Arc<HandlerState>>,
    DriverIdentity(driver): DriverIdentity,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::InvalidParams(e.body_text()))?;
    Ok(Json(handlers::history(&state, &driver, &params)?))
}

async fn rpc_handler(
    State(state): State<Arc<HandlerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return Json(RpcResponse::parse_error(e)),
    };
    let driver = driver_from_headers(&headers);
    let params = request.params.unwrap_or(serde_json::Value::Null);
    let response =
        handlers::dispatch(&state, &request.method, &params, driver.as_ref(), request.id).await;
    Json(response)
}
