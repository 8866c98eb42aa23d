use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tacho_engine::ComplianceError;

use crate::rpc::RpcErrorCode;

/// Everything a request can fail with, before or inside the engine.
#[derive(Debug)]
pub enum ApiError {
    /// No driver identity on the request.
    Unauthorized,
    InvalidParams(String),
    Compliance(ComplianceError),
}

impl From<ComplianceError> for ApiError {
    fn from(e: ComplianceError) -> Self {
        Self::Compliance(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::Compliance(e) => match e {
                ComplianceError::Conflict { .. } => StatusCode::CONFLICT,
                ComplianceError::NotFound(_) => StatusCode::NOT_FOUND,
                ComplianceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ComplianceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    pub fn code(&self) -> RpcErrorCode {
        match self {
            Self::Unauthorized => RpcErrorCode::Unauthorized,
            Self::InvalidParams(_) => RpcErrorCode::InvalidParams,
            Self::Compliance(e) => match e {
                ComplianceError::Conflict { .. } => RpcErrorCode::Conflict,
                ComplianceError::NotFound(_) => RpcErrorCode::NotFound,
                ComplianceError::InvalidInput(_) => RpcErrorCode::InvalidParams,
                ComplianceError::Unavailable(_) => RpcErrorCode::Unavailable,
            },
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized => "missing driver identity".to_string(),
            Self::InvalidParams(msg) => msg.clone(),
            Self::Compliance(e) => e.to_string(),
        }
    }

    /// Extra context for the body, e.g. the session that blocked a start.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::Compliance(ComplianceError::Conflict {
                session_id: Some(id),
                ..
            }) => Some(json!({ "session_id": id })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code().as_str(), error = %self.message(), "request failed");
        }
        let mut body = json!({
            "error": self.message(),
            "code": self.code().as_str(),
        });
        if let (Some(extra), Some(obj)) = (self.data(), body.as_object_mut()) {
            if let Some(fields) = extra.as_object() {
                obj.extend(fields.clone());
            }
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacho_core::ids::DrivingSessionId;

    #[test]
    fn conflict_maps_to_409_with_session() {
        let id = DrivingSessionId::from_raw("drv_1");
        let err = ApiError::from(ComplianceError::Conflict {
            message: "already driving".into(),
            session_id: Some(id),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code().as_str(), "CONFLICT");
        assert_eq!(err.data().unwrap()["session_id"], "drv_1");
    }

    #[test]
    fn statuses_by_kind() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidParams("lat".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(ComplianceError::NotFound("none".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ComplianceError::InvalidInput("days".into())).code().as_str(),
            "INVALID_PARAMS"
        );
        assert_eq!(
            ApiError::from(ComplianceError::Unavailable("db".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
