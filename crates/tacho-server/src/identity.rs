use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use tacho_core::ids::DriverId;

use crate::error::ApiError;

/// Set by the upstream identity layer once the caller is authenticated.
pub const DRIVER_ID_HEADER: &str = "x-driver-id";

/// The authenticated driver making the request. Trusted as given.
#[derive(Clone, Debug)]
pub struct DriverIdentity(pub DriverId);

pub fn driver_from_headers(headers: &HeaderMap) -> Option<DriverId> {
    headers
        .get(DRIVER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(DriverId::from_raw)
}

impl<S: Send + Sync> FromRequestParts<S> for DriverIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        driver_from_headers(&parts.headers)
            .map(DriverIdentity)
            .ok_or(ApiError::Unauthorized)
    }
}
