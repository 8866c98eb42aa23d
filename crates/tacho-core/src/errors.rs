use std::time::Duration;

/// A latitude or longitude outside WGS84 bounds, or not finite.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("latitude out of range: {0}")]
    Latitude(f64),

    #[error("longitude out of range: {0}")]
    Longitude(f64),
}

/// Failures of a location collaborator. "Nothing nearby" is not an error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("location service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response from location service: {0}")]
    InvalidResponse(String),

    #[error("location lookup timed out after {0:?}")]
    Timeout(Duration),
}

impl LocatorError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout(_) => "timeout",
        }
    }
}
