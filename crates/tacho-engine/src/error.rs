use tacho_core::ids::DrivingSessionId;
use tacho_store::StoreError;

/// Failures surfaced by the compliance engine to its caller.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    /// A session is already open. The caller must stop it first.
    #[error("{message}")]
    Conflict {
        message: String,
        session_id: Option<DrivingSessionId>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Storage failed. Read paths never fall back to stale data.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl ComplianceError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StoreError> for ComplianceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(message) => Self::Conflict {
                message,
                session_id: None,
            },
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Unavailable(other.to_string()),
        }
    }
}
