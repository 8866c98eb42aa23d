//! Request handlers shared by the REST routes and the RPC endpoint.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use tacho_core::ids::DriverId;
use tacho_core::location::GeoPoint;
use tacho_core::session::DrivingSession;
use tacho_core::snapshot::ComplianceSnapshot;
use tacho_engine::{ComplianceEngine, DrivingHistory};
use tacho_store::Database;
use tacho_telemetry::{LogQuery, MetricsQuery, TelemetryGuard};

use crate::error::ApiError;
use crate::rpc::{self, RpcErrorCode, RpcResponse};

/// Shared state available to all handlers.
pub struct HandlerState {
    pub db: Database,
    pub engine: Arc<ComplianceEngine>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
}

impl HandlerState {
    pub fn new(db: Database, engine: Arc<ComplianceEngine>) -> Self {
        Self {
            db,
            engine,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

/// Optional last known position. Both coordinates or neither.
#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl StatusParams {
    pub fn position(&self) -> Result<Option<GeoPoint>, ApiError> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng)
                .map(Some)
                .map_err(|e| ApiError::InvalidParams(e.to_string())),
            (None, None) => Ok(None),
            _ => Err(ApiError::InvalidParams(
                "lat and lng must be given together".into(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SessionEnvelope {
    pub session: DrivingSession,
}

#[instrument(skip(state, driver, params), fields(driver_id = %driver))]
pub async fn status(
    state: &HandlerState,
    driver: &DriverId,
    params: &StatusParams,
) -> Result<ComplianceSnapshot, ApiError> {
    let position = params.position()?;
    Ok(state.engine.status(driver, Utc::now(), position).await?)
}

pub fn start(state: &HandlerState, driver: &DriverId) -> Result<SessionEnvelope, ApiError> {
    let session = state.engine.start(driver, Utc::now())?;
    Ok(SessionEnvelope { session })
}

pub fn stop(state: &HandlerState, driver: &DriverId) -> Result<SessionEnvelope, ApiError> {
    let session = state.engine.stop(driver, Utc::now())?;
    Ok(SessionEnvelope { session })
}

pub fn history(
    state: &HandlerState,
    driver: &DriverId,
    params: &HistoryParams,
) -> Result<DrivingHistory, ApiError> {
    Ok(state.engine.history(driver, params.days, Utc::now())?)
}

/// Liveness of the database, as `(healthy, body)`.
pub fn health(state: &HandlerState) -> (bool, serde_json::Value) {
    let db_ok = state.db.ping().is_ok();
    let body = json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "components": {
            "database": if db_ok { "ok" } else { "error" },
            "locator": state.engine.locator_name(),
        },
        "version": env!("CARGO_PKG_VERSION"),
    });
    (db_ok, body)
}

/// Route an RPC call. `driver` comes from the identity header, if present.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    driver: Option<&DriverId>,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        "system.ping" => RpcResponse::success(id, health(state).1),
        "telemetry.metrics" => telemetry_metrics(state, params, id),
        "compliance.status" | "compliance.start" | "compliance.stop" | "compliance.history"
        | "telemetry.logs" => {
            let Some(driver) = driver else {
                return into_rpc(id, Err::<(), _>(ApiError::Unauthorized));
            };
            match method {
                "compliance.status" => {
                    let result = match rpc::parse_params::<StatusParams>(params) {
                        Ok(p) => status(state, driver, &p).await,
                        Err(e) => Err(ApiError::InvalidParams(e)),
                    };
                    into_rpc(id, result)
                }
                "compliance.start" => into_rpc(id, start(state, driver)),
                "compliance.stop" => into_rpc(id, stop(state, driver)),
                "compliance.history" => {
                    let result = rpc::parse_params::<HistoryParams>(params)
                        .map_err(ApiError::InvalidParams)
                        .and_then(|p| history(state, driver, &p));
                    into_rpc(id, result)
                }
                _ => telemetry_logs(state, driver, params, id),
            }
        }
        _ => RpcResponse::method_not_found(id, method),
    }
}

fn into_rpc<T: Serialize>(id: Option<serde_json::Value>, result: Result<T, ApiError>) -> RpcResponse {
    match result.and_then(|value| {
        serde_json::to_value(value).map_err(|e| ApiError::InvalidParams(e.to_string()))
    }) {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::error(id, e.code(), e.message(), e.data()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LogParams {
    level: Option<String>,
    target: Option<String>,
    session_id: Option<String>,
    since: Option<String>,
    limit: Option<u32>,
}

/// Persisted warn+ logs about the calling driver only.
fn telemetry_logs(
    state: &HandlerState,
    driver: &DriverId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(sink) = state.telemetry.as_ref().and_then(|t| t.logs()) else {
        return RpcResponse::success(id, json!({ "logs": [], "totalCount": 0, "enabled": false }));
    };
    let p: LogParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, RpcErrorCode::InvalidParams, e, None),
    };

    let query = LogQuery {
        level: p.level.map(|l| l.to_uppercase()),
        target: p.target,
        session_id: p.session_id,
        driver_id: Some(driver.as_str().to_string()),
        since: p.since,
        limit: p.limit,
    };
    match sink.query(&query) {
        Ok(logs) => {
            let count = logs.len();
            RpcResponse::success(id, json!({ "logs": logs, "totalCount": count, "enabled": true }))
        }
        Err(e) => RpcResponse::error(id, RpcErrorCode::Unavailable, e.to_string(), None),
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetricParams {
    name: Option<String>,
    since: Option<String>,
    limit: Option<u32>,
}

fn telemetry_metrics(
    state: &HandlerState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(metrics) = state.telemetry.as_ref().and_then(|t| t.metrics()) else {
        return RpcResponse::success(id, json!({ "metrics": [], "totalCount": 0, "enabled": false }));
    };
    let p: MetricParams = match rpc::parse_params(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, RpcErrorCode::InvalidParams, e, None),
    };

    let query = MetricsQuery {
        name: p.name,
        since: p.since,
        limit: p.limit,
    };
    match metrics.query(&query) {
        Ok(rows) => {
            let count = rows.len();
            RpcResponse::success(id, json!({ "metrics": rows, "totalCount": count, "enabled": true }))
        }
        Err(e) => RpcResponse::error(id, RpcErrorCode::Unavailable, e.to_string(), None),
    }
}
